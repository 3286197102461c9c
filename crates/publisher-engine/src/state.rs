//! Publisher state machine states.

/// Where the consumer is in a publishing run.
///
/// ```text
/// AwaitingParams --(SPS and PPS held)--> HeaderSent --(first frame)--> Streaming
///       |                                    |                            |
///       +------------- end of stream, stop, failure -----------------> Stopped
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublisherState {
    /// Waiting for both parameter sets. Frames are discarded.
    #[default]
    AwaitingParams,

    /// Metadata and sequence header sent, no frame yet.
    HeaderSent,

    /// Frames are being forwarded.
    Streaming,

    /// Terminal.
    Stopped,
}

impl PublisherState {
    pub fn is_awaiting_params(&self) -> bool {
        matches!(self, Self::AwaitingParams)
    }

    /// True once the sequence header went out.
    pub fn has_sent_header(&self) -> bool {
        matches!(self, Self::HeaderSent | Self::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingParams => "AwaitingParams",
            Self::HeaderSent => "HeaderSent",
            Self::Streaming => "Streaming",
            Self::Stopped => "Stopped",
        }
    }
}

/// Why a run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An end-of-stream NAL unit was consumed.
    EndOfStream,

    /// The stop handle was triggered.
    StopRequested,

    /// The source ran dry and the queue was drained.
    SourceExhausted,
}

impl StopReason {
    pub fn name(self) -> &'static str {
        match self {
            Self::EndOfStream => "end of stream",
            Self::StopRequested => "stop requested",
            Self::SourceExhausted => "source exhausted",
        }
    }
}
