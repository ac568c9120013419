//! Device context abstraction
//!
//! Everything the harness needs from an accelerator: memory limits,
//! capability flags, buffer creation, one command queue, and the SYRK kernel
//! itself. A backend is passed explicitly to the harness; there is no
//! process-wide device singleton.
//!
//! [`sim::SimDevice`] implements the trait in host memory for the CLI and the
//! tests.

use crate::element::Element;
use crate::error::DeviceStatus;
use crate::problem::SyrkShape;

pub mod sim;

/// Result type for raw device calls
pub type DeviceResult<T> = std::result::Result<T, DeviceStatus>;

/// Access mode of a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Kernels may only read the buffer
    ReadOnly,
    /// Kernels may read and write the buffer
    ReadWrite,
}

/// Arguments of one device SYRK submission
#[derive(Debug)]
pub struct SyrkCall<'a, T, B> {
    /// Order, triangle, transpose, dimensions and leading dimensions
    pub shape: SyrkShape,
    /// Multiplier of the rank-k product
    pub alpha: T,
    /// Input matrix
    pub a: &'a B,
    /// Offset of A in `a`, in elements
    pub off_a: usize,
    /// Multiplier of the existing C
    pub beta: T,
    /// Result matrix
    pub c: &'a B,
    /// Offset of C in `c`, in elements
    pub off_c: usize,
}

/// Abstraction over an accelerator and its command queues
///
/// Buffers are released when dropped. Calls that enqueue work return an event
/// that completes asynchronously; `wait_for_events` and `wait_for_finish`
/// block the calling thread with no timeout.
pub trait DeviceBackend {
    /// Device-resident memory object
    type Buffer;
    /// Command queue handle
    type Queue;
    /// Completion event of an enqueued command
    type Event;

    /// Human-readable device name
    fn device_name(&self) -> String;

    /// Available global memory of device `device_index`, in bytes
    fn available_global_memory(&self, device_index: usize) -> u64;

    /// Largest single allocation, in bytes
    fn max_alloc_size(&self) -> u64;

    /// Whether the device supports native fp64 arithmetic
    fn supports_double_precision(&self) -> bool;

    /// Whether alpha is active for the current configuration
    fn use_alpha(&self) -> bool;

    /// Whether beta is active for the current configuration
    fn use_beta(&self) -> bool;

    /// Command queues of the context
    fn command_queues(&self) -> &[Self::Queue];

    /// Allocate `byte_offset + data.len()` bytes and upload `data` at `byte_offset`
    ///
    /// # Errors
    ///
    /// Returns the device status if the allocation or upload is rejected.
    fn create_buffer(
        &self,
        data: &[u8],
        byte_offset: usize,
        access: Access,
    ) -> DeviceResult<Self::Buffer>;

    /// Enqueue a host-to-device write of `data` at `byte_offset`
    ///
    /// # Errors
    ///
    /// Returns the device status if the write cannot be enqueued.
    fn enqueue_write(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        byte_offset: usize,
        data: &[u8],
    ) -> DeviceResult<Self::Event>;

    /// Block until every event completes
    ///
    /// # Errors
    ///
    /// Returns the first failing event status.
    fn wait_for_events(&self, events: &[Self::Event]) -> DeviceResult<()>;

    /// Enqueue `C := alpha * op(A) * op(A)^T + beta * C` on the first queue of `queues`
    ///
    /// The kernel starts after every event in `wait_list` completed.
    ///
    /// # Errors
    ///
    /// Returns the device status if the submission is rejected.
    fn enqueue_syrk<T: Element>(
        &self,
        call: &SyrkCall<'_, T, Self::Buffer>,
        queues: &[Self::Queue],
        wait_list: &[Self::Event],
    ) -> DeviceResult<Self::Event>;

    /// Submit all enqueued commands to the device
    ///
    /// # Errors
    ///
    /// Returns the device status if any queue refuses the flush.
    fn flush(&self, queues: &[Self::Queue]) -> DeviceResult<()>;

    /// Block until `event` completes and `queues` are drained
    ///
    /// # Errors
    ///
    /// Returns the event's failure status or a queue error.
    fn wait_for_finish(&self, queues: &[Self::Queue], event: &Self::Event) -> DeviceResult<()>;
}
