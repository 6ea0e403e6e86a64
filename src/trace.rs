//! Execution-trace snapshots captured when a fault is intercepted.
//!
//! A [`Trace`] is taken on the launched strand while it panics, before the
//! stack unwinds, and handed to the [`Reporter`] together with the [`Fault`].
//! Which frames end up in it is controlled by a [`TraceFilter`].
//!
//! # Environment Variables
//!
//! [`TraceFilter::from_env`] reads these once per process:
//!
//! - `RUST_BACKTRACE=full` - Disables all filtering and shows full paths
//! - `STRANDGUARD_BACKTRACE` - Comma-separated options:
//!   - `full` - Disables all filtering
//!   - `full_paths` - Show full file paths instead of shortened paths
//!   - `off` - Skip capturing altogether
//!
//! # Debugging symbols in release builds
//!
//! Frames are only kept when both a symbol name and a file name can be
//! resolved. Make sure release builds keep their debug info if you want
//! useful traces:
//!
//! ```toml
//! [profile.release]
//! strip = false
//! debug = "line-tables-only"
//! ```
//!
//! [`Reporter`]: crate::Reporter
//! [`Fault`]: crate::Fault

use std::{borrow::Cow, fmt, sync::OnceLock};

use backtrace::BytesOrWideString;

/// A snapshot of the call stack at the point where a fault was intercepted.
///
/// # Examples
///
/// ```rust
/// use strandguard::trace::{Trace, TraceFilter};
///
/// let trace = Trace::capture(&TraceFilter::FULL);
/// assert!(!trace.to_string().is_empty());
/// ```
#[derive(Debug)]
pub struct Trace {
    /// The entries in the trace, ordered from most recent to oldest.
    pub entries: Vec<TraceEntry>,
    /// Total number of frames that were omitted due to filtering.
    pub total_omitted_frames: usize,
    /// Whether full file paths are rendered.
    pub show_full_path: bool,
    /// Set when capturing was switched off through [`TraceFilter::disabled`].
    pub disabled: bool,
}

/// A single entry in a [`Trace`].
#[derive(Debug)]
pub enum TraceEntry {
    /// A normal stack frame.
    Frame(Frame),
    /// A run of consecutive frames from one crate that was folded away.
    OmittedFrames {
        /// Number of omitted frames.
        count: usize,
        /// The name of the crate whose frames were omitted.
        skipped_crate: &'static str,
    },
}

/// A single stack frame.
#[derive(Debug)]
pub struct Frame {
    /// The demangled symbol name for this frame.
    pub sym_demangled: String,
    /// File path information for this frame, if available.
    pub frame_path: Option<FramePath>,
    /// Line number in the source file, if available.
    pub lineno: Option<u32>,
}

/// File path information for a stack frame.
#[derive(Debug)]
pub struct FramePath {
    /// The raw file path from the debug information.
    pub raw_path: String,
    /// The crate name if it could be detected from the path.
    pub crate_name: Option<Cow<'static, str>>,
    /// The path split into a well-known prefix and the rest.
    pub split_path: Option<FramePrefix>,
}

/// A decomposed file path where a known prefix was identified.
#[derive(Debug)]
pub struct FramePrefix {
    /// The kind of prefix: `"RUST_SRC"`, `"CARGO"` or `"STRANDGUARD"`.
    pub prefix_kind: &'static str,
    /// The full prefix that was removed from the original path.
    pub prefix: String,
    /// The remaining path after the prefix was removed.
    ///
    /// Example: `"regex-1.12.2/src/regex/string.rs"`
    pub suffix: String,
}

/// Which frames to keep when capturing a [`Trace`].
///
/// # Examples
///
/// ```rust
/// use strandguard::trace::TraceFilter;
///
/// let filter = TraceFilter {
///     skipped_middle_crates: &["std", "core", "alloc", "rayon"],
///     max_entry_count: 10,
///     ..TraceFilter::DEFAULT
/// };
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceFilter {
    /// Crates whose frames are hidden while they are at the top of the stack.
    pub skipped_initial_crates: &'static [&'static str],
    /// Crates whose consecutive frames are folded into one entry.
    pub skipped_middle_crates: &'static [&'static str],
    /// Crates whose frames are hidden at the bottom of the stack.
    pub skipped_final_crates: &'static [&'static str],
    /// Maximum number of entries to include.
    pub max_entry_count: usize,
    /// Whether to render full file paths.
    pub show_full_path: bool,
    /// Skip capturing entirely.
    pub disabled: bool,
}

impl TraceFilter {
    /// Hides the capturing machinery, the panic runtime and the frames that
    /// start the strand, so the trace begins at the panic site.
    pub const DEFAULT: Self = Self {
        skipped_initial_crates: &["backtrace", "strandguard", "core", "std", "alloc"],
        skipped_middle_crates: &["std", "core", "alloc"],
        skipped_final_crates: &["std", "core", "alloc", "strandguard"],
        max_entry_count: 20,
        show_full_path: false,
        disabled: false,
    };

    /// Keeps every resolvable frame.
    pub const FULL: Self = Self {
        skipped_initial_crates: &[],
        skipped_middle_crates: &[],
        skipped_final_crates: &[],
        max_entry_count: usize::MAX,
        show_full_path: true,
        disabled: false,
    };

    /// Captures nothing.
    pub const fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::DEFAULT
        }
    }

    /// Builds a filter from `RUST_BACKTRACE` and `STRANDGUARD_BACKTRACE`.
    pub fn from_env() -> Self {
        let env_options = TraceEnvOptions::get();
        if env_options.disabled {
            Self::disabled()
        } else if env_options.full {
            Self {
                show_full_path: env_options.show_full_path,
                ..Self::FULL
            }
        } else {
            Self {
                show_full_path: env_options.show_full_path,
                ..Self::DEFAULT
            }
        }
    }
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct TraceEnvOptions {
    full: bool,
    show_full_path: bool,
    disabled: bool,
}

impl TraceEnvOptions {
    fn get() -> &'static Self {
        static TRACE_FLAGS: OnceLock<TraceEnvOptions> = OnceLock::new();

        TRACE_FLAGS.get_or_init(|| {
            let rust_backtrace = std::env::var("RUST_BACKTRACE").ok();
            let strandguard_backtrace = std::env::var("STRANDGUARD_BACKTRACE").ok();
            Self::parse(rust_backtrace.as_deref(), strandguard_backtrace.as_deref())
        })
    }

    fn parse(rust_backtrace: Option<&str>, strandguard_backtrace: Option<&str>) -> Self {
        let full = rust_backtrace.is_some_and(|var| var == "full");
        let mut options = Self {
            full,
            show_full_path: full,
            disabled: false,
        };
        for v in strandguard_backtrace.unwrap_or_default().split(',') {
            let v = v.trim();
            if v.eq_ignore_ascii_case("full") {
                options.full = true;
            } else if v.eq_ignore_ascii_case("full_paths") {
                options.show_full_path = true;
            } else if v.eq_ignore_ascii_case("off") {
                options.disabled = true;
            }
        }
        options
    }
}

impl Trace {
    /// Captures the current call stack, applying `filter`.
    ///
    /// Always returns a trace; when nothing could be resolved the trace is
    /// empty and renders a placeholder line.
    pub fn capture(filter: &TraceFilter) -> Self {
        if filter.disabled {
            return Self {
                entries: Vec::new(),
                total_omitted_frames: 0,
                show_full_path: filter.show_full_path,
                disabled: true,
            };
        }

        let mut initial_filtering = !filter.skipped_initial_crates.is_empty();
        let mut entries: Vec<TraceEntry> = Vec::new();
        let mut total_omitted_frames = 0;

        let mut delayed_omitted_frame: Option<Frame> = None;
        let mut currently_omitted_crate_name: Option<&'static str> = None;
        let mut currently_omitted_frames = 0;

        backtrace::trace(|frame| {
            backtrace::resolve_frame(frame, |symbol| {
                let (Some(sym), Some(filename_raw)) = (symbol.name(), symbol.filename_raw()) else {
                    return;
                };

                if entries.len() >= filter.max_entry_count {
                    total_omitted_frames += 1;
                    return;
                }

                let frame_path = FramePath::new(filename_raw);
                let sym_demangled = format!("{sym:#}");

                if initial_filtering {
                    if let Some(cur_crate_name) = &frame_path.crate_name
                        && filter.skipped_initial_crates.contains(&&**cur_crate_name)
                    {
                        total_omitted_frames += 1;
                        return;
                    } else {
                        initial_filtering = false;
                    }
                }

                if let Some(cur_crate_name) = &frame_path.crate_name
                    && let Some(omitted_crate_name) = &currently_omitted_crate_name
                    && cur_crate_name == omitted_crate_name
                {
                    delayed_omitted_frame = None;
                    currently_omitted_frames += 1;
                    total_omitted_frames += 1;
                    return;
                }

                if let Some(omitted_crate_name) = currently_omitted_crate_name.take() {
                    flush_omitted(
                        &mut entries,
                        delayed_omitted_frame.take(),
                        currently_omitted_frames,
                        omitted_crate_name,
                    );
                    currently_omitted_frames = 0;
                }

                if let Some(cur_crate_name) = &frame_path.crate_name
                    && let Some(skipped_crate) = filter
                        .skipped_middle_crates
                        .iter()
                        .find(|&crate_name| crate_name == cur_crate_name)
                {
                    currently_omitted_crate_name = Some(skipped_crate);
                    currently_omitted_frames = 1;
                    total_omitted_frames += 1;
                    delayed_omitted_frame = Some(Frame {
                        sym_demangled,
                        frame_path: Some(frame_path),
                        lineno: symbol.lineno(),
                    });
                    return;
                }

                entries.push(TraceEntry::Frame(Frame {
                    sym_demangled,
                    frame_path: Some(frame_path),
                    lineno: symbol.lineno(),
                }));
            });

            true
        });

        if let Some(omitted_crate_name) = currently_omitted_crate_name.take() {
            flush_omitted(
                &mut entries,
                delayed_omitted_frame.take(),
                currently_omitted_frames,
                omitted_crate_name,
            );
        }

        total_omitted_frames += trim_final_frames(&mut entries, filter);

        Self {
            entries,
            total_omitted_frames,
            show_full_path: filter.show_full_path,
            disabled: false,
        }
    }

    /// Returns `true` if no frame was kept.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the kept frames, skipping folded runs.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.entries.iter().filter_map(|entry| match entry {
            TraceEntry::Frame(frame) => Some(frame),
            TraceEntry::OmittedFrames { .. } => None,
        })
    }
}

// A run of exactly one omitted frame is shown as the frame itself.
fn flush_omitted(
    entries: &mut Vec<TraceEntry>,
    delayed_frame: Option<Frame>,
    count: usize,
    skipped_crate: &'static str,
) {
    if let Some(delayed_frame) = delayed_frame {
        entries.push(TraceEntry::Frame(delayed_frame));
    } else {
        entries.push(TraceEntry::OmittedFrames {
            count,
            skipped_crate,
        });
    }
}

fn trim_final_frames(entries: &mut Vec<TraceEntry>, filter: &TraceFilter) -> usize {
    let mut omitted = 0;
    while let Some(last) = entries.last() {
        match last {
            TraceEntry::Frame(frame) => {
                let skip = if let Some(frame_path) = &frame.frame_path
                    && let Some(crate_name) = &frame_path.crate_name
                    && filter.skipped_final_crates.contains(&&**crate_name)
                {
                    true
                } else {
                    !filter.skipped_final_crates.is_empty()
                        && matches!(
                            frame.sym_demangled.as_str(),
                            "__libc_start_call_main"
                                | "__libc_start_main_impl"
                                | "start_thread"
                                | "__GI___clone3"
                                | "thread_start"
                        )
                };

                if skip {
                    omitted += 1;
                    entries.pop();
                } else {
                    break;
                }
            }
            TraceEntry::OmittedFrames {
                skipped_crate,
                count,
            } => {
                if filter.skipped_final_crates.contains(skipped_crate) {
                    omitted += count;
                    entries.pop();
                } else {
                    break;
                }
            }
        }
    }
    omitted
}

/// Extracts the bare function name from a demangled symbol, dropping the
/// module path and generic arguments.
fn get_function_name(s: &str) -> &str {
    let mut word_start = 0usize;
    let mut word_end = 0usize;
    let mut angle_nesting_level = 0u64;
    let mut curly_nesting_level = 0u64;
    let mut potential_function_arrow = false;
    let mut inside_word = false;

    for (i, c) in s.char_indices() {
        if curly_nesting_level == 0 && angle_nesting_level == 0 {
            if !inside_word && unicode_ident::is_xid_start(c) {
                word_start = i;
                inside_word = true;
            } else if inside_word && !unicode_ident::is_xid_continue(c) {
                word_end = i;
                inside_word = false;
            }
        }

        let was_potential_function_arrow = potential_function_arrow;
        potential_function_arrow = c == '-';

        if c == '<' {
            angle_nesting_level = angle_nesting_level.saturating_add(1);
        } else if c == '>' && !was_potential_function_arrow {
            angle_nesting_level = angle_nesting_level.saturating_sub(1);
        } else if c == '{' {
            curly_nesting_level = curly_nesting_level.saturating_add(1);
            if !inside_word && curly_nesting_level == 1 && angle_nesting_level == 0 {
                word_start = i;
                inside_word = true;
            }
        } else if c == '}' {
            curly_nesting_level = curly_nesting_level.saturating_sub(1);
            if inside_word && curly_nesting_level == 0 {
                word_end = i + 1;
                inside_word = false;
            }
        }
    }

    if word_start < word_end {
        &s[word_start..word_end]
    } else {
        &s[word_start..]
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_UNWRAPPED_SYM_LENGTH: usize = 25;

        if self.disabled {
            return writeln!(f, "<trace capture disabled>");
        }
        if self.entries.is_empty() {
            writeln!(f, "<no resolvable frames>")?;
        }

        let mut max_seen_length = 0;
        for frame in self.frames() {
            let sym = get_function_name(&frame.sym_demangled);
            if sym.len() <= MAX_UNWRAPPED_SYM_LENGTH && sym.len() > max_seen_length {
                max_seen_length = sym.len();
            }
        }

        for entry in &self.entries {
            match entry {
                TraceEntry::OmittedFrames {
                    count,
                    skipped_crate,
                } => {
                    writeln!(
                        f,
                        "... omitted {count} frame(s) from crate '{skipped_crate}' ..."
                    )?;
                }
                TraceEntry::Frame(frame) => {
                    let sym = get_function_name(&frame.sym_demangled);

                    if sym.len() <= MAX_UNWRAPPED_SYM_LENGTH {
                        write!(f, "{sym:<max_seen_length$} - ")?;
                    } else {
                        write!(f, "{sym}\n   - ")?;
                    }

                    if let Some(path) = &frame.frame_path {
                        match &path.split_path {
                            Some(split_path) if !self.show_full_path => {
                                write!(f, "[..]/{}", split_path.suffix)?;
                            }
                            _ => write!(f, "{}", path.raw_path)?,
                        }

                        if let Some(lineno) = frame.lineno {
                            write!(f, ":{lineno}")?;
                        }
                    }
                    writeln!(f)?;
                }
            }
        }

        if self.total_omitted_frames > 0 {
            writeln!(
                f,
                "note: {} frame(s) omitted. For a complete trace, set RUST_BACKTRACE=full.",
                self.total_omitted_frames
            )?;
        }

        Ok(())
    }
}

const STRANDGUARD_SRC_PREFIX: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/src/");

impl FramePath {
    fn new(path: BytesOrWideString<'_>) -> Self {
        static REGEXES: OnceLock<[regex::Regex; 2]> = OnceLock::new();
        let [std_regex, registry_regex] = REGEXES.get_or_init(|| {
            [
                // Matches Rust standard library paths:
                // - /lib/rustlib/src/rust/library/{std|core|alloc}/src/...
                // - /rustc/{40-char-hash}/library/{std|core|alloc}/src/...
                regex::Regex::new(
                    r"(?:/lib/rustlib/src/rust|^/rustc/[0-9a-f]{40})/library/(std|core|alloc)/src/.*$",
                )
                .expect("built-in regex pattern for std library paths should be valid"),
                // Matches Cargo registry paths:
                // - /.cargo/registry/src/{index}-{16-char-hash}/{crate}-{version}/src/...
                regex::Regex::new(
                    r"/\.cargo/registry/src/[^/]+-[0-9a-f]{16}/([^./]+)-[0-9]+\.[^/]*/src/.*$",
                )
                .expect("built-in regex pattern for cargo registry paths should be valid"),
            ]
        });

        let path_str = path.to_string();

        if let Some(captures) = std_regex.captures(&path_str)
            && let Some(crate_capture) = captures.get(1)
        {
            let (prefix, suffix) = path_str.split_at(crate_capture.start());
            let crate_name: &'static str = match crate_capture.as_str() {
                "std" => "std",
                "core" => "core",
                _ => "alloc",
            };
            Self {
                crate_name: Some(Cow::Borrowed(crate_name)),
                split_path: Some(FramePrefix {
                    prefix_kind: "RUST_SRC",
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                }),
                raw_path: path_str,
            }
        } else if let Some(captures) = registry_regex.captures(&path_str)
            && let Some(crate_capture) = captures.get(1)
        {
            let crate_name = crate_capture.as_str().to_string();
            let (prefix, suffix) = path_str.split_at(crate_capture.start());
            Self {
                split_path: Some(FramePrefix {
                    prefix_kind: "CARGO",
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                }),
                crate_name: Some(Cow::Owned(crate_name)),
                raw_path: path_str,
            }
        } else if let Some(suffix) = path_str.strip_prefix(STRANDGUARD_SRC_PREFIX) {
            Self {
                crate_name: Some(Cow::Borrowed("strandguard")),
                split_path: Some(FramePrefix {
                    prefix_kind: "STRANDGUARD",
                    prefix: STRANDGUARD_SRC_PREFIX.to_string(),
                    suffix: format!("strandguard/src/{suffix}"),
                }),
                raw_path: path_str,
            }
        } else {
            Self {
                crate_name: None,
                split_path: None,
                raw_path: path_str,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn frame_path(path: &str) -> FramePath {
        FramePath::new(BytesOrWideString::Bytes(path.as_bytes()))
    }

    #[test]
    fn test_std_path_detection() {
        let path = frame_path(
            "/rustc/0123456789abcdef0123456789abcdef01234567/library/std/src/panicking.rs",
        );
        assert_eq!(path.crate_name.as_deref(), Some("std"));
        let split = path.split_path.expect("std path should be split");
        assert_eq!(split.prefix_kind, "RUST_SRC");
        assert_eq!(split.suffix, "std/src/panicking.rs");
    }

    #[test]
    fn test_registry_path_detection() {
        let path = frame_path(
            "/home/user/.cargo/registry/src/index.crates.io-1949cf8c6b5b557f/backtrace-0.3.76/src/backtrace/mod.rs",
        );
        assert_eq!(path.crate_name.as_deref(), Some("backtrace"));
        let split = path.split_path.expect("registry path should be split");
        assert_eq!(split.prefix_kind, "CARGO");
        assert_eq!(split.suffix, "backtrace-0.3.76/src/backtrace/mod.rs");
    }

    #[test]
    fn test_own_path_detection() {
        let raw = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src")
            .join("launcher.rs");
        let path = frame_path(&raw.to_string_lossy());
        assert_eq!(path.crate_name.as_deref(), Some("strandguard"));
        assert_eq!(
            path.split_path.map(|split| split.suffix).as_deref(),
            Some("strandguard/src/launcher.rs")
        );
    }

    #[test]
    fn test_unknown_path() {
        let path = frame_path("/tmp/some/app/src/main.rs");
        assert!(path.crate_name.is_none());
        assert!(path.split_path.is_none());
        assert_eq!(path.raw_path, "/tmp/some/app/src/main.rs");
    }

    #[test]
    fn test_get_function_name() {
        assert_eq!(get_function_name("strandguard::launcher::guard"), "guard");
        assert_eq!(
            get_function_name("<alloc::boxed::Box<F,A> as core::ops::function::FnOnce<Args>>::call_once"),
            "call_once"
        );
        assert_eq!(
            get_function_name("app::main::{{closure}}"),
            "{{closure}}"
        );
        assert_eq!(get_function_name("run"), "run");
    }

    #[test]
    fn test_env_options() {
        assert_eq!(TraceEnvOptions::parse(None, None), TraceEnvOptions::default());
        assert_eq!(
            TraceEnvOptions::parse(Some("full"), None),
            TraceEnvOptions {
                full: true,
                show_full_path: true,
                disabled: false,
            }
        );
        assert_eq!(
            TraceEnvOptions::parse(Some("1"), Some("full_paths, OFF")),
            TraceEnvOptions {
                full: false,
                show_full_path: true,
                disabled: true,
            }
        );
    }

    #[test]
    fn test_disabled_capture() {
        let trace = Trace::capture(&TraceFilter::disabled());
        assert!(trace.is_empty());
        assert!(trace.disabled);
        assert_eq!(trace.to_string(), "<trace capture disabled>\n");
    }

    #[test]
    fn test_full_capture_renders_frames() {
        let trace = Trace::capture(&TraceFilter::FULL);
        let rendered = trace.to_string();
        assert!(!rendered.is_empty());
        assert!(trace.frames().count() <= trace.entries.len());
    }

    #[test]
    fn test_max_entry_count() {
        let filter = TraceFilter {
            max_entry_count: 1,
            ..TraceFilter::FULL
        };
        let trace = Trace::capture(&filter);
        assert!(trace.entries.len() <= 1);
    }

    #[test]
    fn test_trim_final_frames() {
        let mut entries = vec![
            TraceEntry::Frame(Frame {
                sym_demangled: "app::work".to_string(),
                frame_path: Some(frame_path("/tmp/app/src/lib.rs")),
                lineno: Some(3),
            }),
            TraceEntry::OmittedFrames {
                count: 4,
                skipped_crate: "std",
            },
            TraceEntry::Frame(Frame {
                sym_demangled: "start_thread".to_string(),
                frame_path: Some(frame_path("./nptl/pthread_create.c")),
                lineno: Some(447),
            }),
        ];
        let omitted = trim_final_frames(&mut entries, &TraceFilter::DEFAULT);
        assert_eq!(omitted, 5);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_trim_launch_boundary_frames() {
        let boundary = format!("{STRANDGUARD_SRC_PREFIX}launcher.rs");
        let mut entries = vec![
            TraceEntry::Frame(Frame {
                sym_demangled: "app::failing_step".to_string(),
                frame_path: Some(frame_path("/tmp/app/src/lib.rs")),
                lineno: Some(9),
            }),
            TraceEntry::OmittedFrames {
                count: 3,
                skipped_crate: "core",
            },
            TraceEntry::Frame(Frame {
                sym_demangled: "strandguard::launcher::guard".to_string(),
                frame_path: Some(frame_path(&boundary)),
                lineno: Some(270),
            }),
        ];

        assert_eq!(trim_final_frames(&mut entries, &TraceFilter::FULL), 0);
        assert_eq!(entries.len(), 3);

        assert_eq!(trim_final_frames(&mut entries, &TraceFilter::DEFAULT), 4);
        assert_eq!(entries.len(), 1);
    }
}
