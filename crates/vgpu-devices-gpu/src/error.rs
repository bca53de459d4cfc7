use std::io;

use virtio_gpu_proto::protocol::{
    VIRTIO_GPU_RESP_ERR_INVALID_PARAMETER, VIRTIO_GPU_RESP_ERR_INVALID_RESOURCE_ID,
    VIRTIO_GPU_RESP_ERR_INVALID_SCANOUT_ID, VIRTIO_GPU_RESP_ERR_OUT_OF_MEMORY,
    VIRTIO_GPU_RESP_ERR_UNSPEC,
};
use virtio_gpu_proto::ProtocolError;

use crate::dmabuf::DmaBufError;
use crate::registry::RegistryError;

/// Why a control command failed. Each variant answers the guest with one response code.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unsupported command 0x{0:x}")]
    Unsupported(u32),
    #[error("blob resources are not supported on this host")]
    BlobUnsupported,
    #[error(transparent)]
    DmaBuf(#[from] DmaBufError),
    #[error("invalid resource id {0}")]
    InvalidResourceId(u32),
    #[error("invalid scanout id {0}")]
    InvalidScanoutId(u32),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("malformed request: {0}")]
    Malformed(#[from] ProtocolError),
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
}

impl CommandError {
    pub fn response_type(&self) -> u32 {
        match self {
            CommandError::Unsupported(_)
            | CommandError::BlobUnsupported
            | CommandError::DmaBuf(_) => VIRTIO_GPU_RESP_ERR_UNSPEC,
            CommandError::InvalidResourceId(_) => VIRTIO_GPU_RESP_ERR_INVALID_RESOURCE_ID,
            CommandError::InvalidScanoutId(_) => VIRTIO_GPU_RESP_ERR_INVALID_SCANOUT_ID,
            CommandError::InvalidParameter(_) | CommandError::Malformed(_) => {
                VIRTIO_GPU_RESP_ERR_INVALID_PARAMETER
            }
            CommandError::OutOfMemory(_) => VIRTIO_GPU_RESP_ERR_OUT_OF_MEMORY,
        }
    }
}

/// Device construction failures.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to spawn display worker: {0}")]
    WorkerSpawn(#[source] io::Error),
    #[error("display worker stopped")]
    WorkerGone,
}
