/// The supported output formats for decoding results.
///
/// Each variant maps to a concrete `ResultEncoder` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputType {
    /// A JSON array with one object per utterance.
    Json,

    /// CTM word alignments.
    Ctm,

    /// One hypothesis line per utterance.
    Hyp,
}
