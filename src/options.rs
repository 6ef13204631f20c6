//! Parse-time configuration. Shape grounded on `itm-decode`'s
//! `DecoderOptions` (a small `Copy` struct of togglable strictness knobs
//! passed by value into the decoder entry point).

/// Configures how strictly the decoder treats a handful of conditions the
/// format leaves ambiguous (spec.md §9, resolved in DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// When `true`, a `MetadataBlock` entry that redefines an already-seen
    /// `metadata_id` with a different provider/eventId is a fatal error
    /// instead of a silent overwrite. Default `false`.
    pub reject_divergent_metadata_redefinition: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            reject_divergent_metadata_redefinition: false,
        }
    }
}

/// Reports how much of the stream has been consumed so far, for callers
/// that want to drive a progress bar over a known total size.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub bytes_consumed: u64,
    pub events_decoded: u64,
}

/// Invoked after every fully-decoded block. Mirrors the watermark-callback
/// shape spec.md §6 describes for the external interface.
pub type ProgressCallback<'a> = dyn FnMut(Progress) + Send + 'a;
