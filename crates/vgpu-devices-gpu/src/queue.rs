//! Transport-facing queue interfaces.
//!
//! Descriptor walking lives in the virtio transport. The device only sees each chain as the bytes
//! the guest wrote plus room for one response.

pub const CONTROL_QUEUE: u16 = 0;
pub const CURSOR_QUEUE: u16 = 1;
pub const NUM_QUEUES: usize = 2;

/// Queue size advertised for both queues.
pub const QUEUE_SIZE: u16 = 64;

/// Maximum descriptors per chain the device accepts.
pub const MAX_SEGMENTS: usize = 256;

/// One available descriptor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRequest {
    /// Head descriptor index, returned with the response.
    pub head: u16,
    /// Concatenated device-readable buffers.
    pub request: Vec<u8>,
    /// Total size of the device-writable buffers.
    pub response_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("descriptor chain has {0} segments")]
    TooManySegments(usize),
    #[error("malformed descriptor chain: {0}")]
    Malformed(&'static str),
}

pub trait VirtQueue: Send {
    /// Next available chain, in the order the guest made it available.
    fn pop_chain(&mut self) -> Result<Option<QueueRequest>, QueueError>;

    /// Writes `response` into the chain `head` and marks it used.
    fn add_used(&mut self, head: u16, response: &[u8]);

    /// Signals the guest that used chains are ready.
    fn notify_used(&mut self);
}

/// Config-change interrupt line of the transport.
pub trait InterruptSink: Send + Sync {
    fn raise_config_change(&self);
}
