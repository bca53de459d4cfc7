//! Guest physical memory access for device models.
//!
//! [`GuestMemory`] is the copy-based access trait every device uses. Backends that keep guest RAM
//! in a host memory file ([`MemfdGuestMemory`]) can additionally resolve guest addresses to file
//! regions, which is what zero-copy buffer sharing (udmabuf) is built on.

mod memfd;
mod phys;

pub use memfd::MemfdGuestMemory;
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, MemfdRegion};
