//! Simulated accelerator in host memory
//!
//! Each command queue is a worker thread that executes writes and kernels in
//! submission order, so enqueued work really does complete asynchronously
//! relative to the caller. Memory is accounted per buffer and released on
//! drop. Faults can be injected at any step, and every host-visible call is
//! appended to a command log so tests can check the order of operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use super::{Access, DeviceBackend, DeviceResult, SyrkCall};
use crate::element::Element;
use crate::error::DeviceStatus;
use crate::problem::buffer_bytes;
use crate::reference;

const MIB: u64 = 1024 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration of a simulated device
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Reported device name
    pub name: String,
    /// Global memory in bytes
    pub global_mem: u64,
    /// Largest single allocation in bytes
    pub max_alloc: u64,
    /// Native fp64 support
    pub double_precision: bool,
    /// Whether alpha is active
    pub use_alpha: bool,
    /// Whether beta is active
    pub use_beta: bool,
    /// Number of command queues
    pub queue_count: usize,
    /// Extra latency added to every kernel
    pub kernel_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "SimDevice".to_string(),
            global_mem: 1024 * MIB,
            max_alloc: 256 * MIB,
            double_precision: true,
            use_alpha: true,
            use_beta: true,
            queue_count: 1,
            kernel_delay: Duration::ZERO,
        }
    }
}

impl SimConfig {
    /// Set global memory and the allocation limit, in bytes
    #[must_use]
    pub fn with_memory(mut self, global_mem: u64, max_alloc: u64) -> Self {
        self.global_mem = global_mem;
        self.max_alloc = max_alloc;
        self
    }

    /// Enable or disable fp64 support
    #[must_use]
    pub fn with_double_precision(mut self, supported: bool) -> Self {
        self.double_precision = supported;
        self
    }

    /// Set which multipliers are active
    #[must_use]
    pub fn with_scalars(mut self, use_alpha: bool, use_beta: bool) -> Self {
        self.use_alpha = use_alpha;
        self.use_beta = use_beta;
        self
    }

    /// Add latency to every kernel
    #[must_use]
    pub fn with_kernel_delay(mut self, delay: Duration) -> Self {
        self.kernel_delay = delay;
        self
    }
}

/// Step at which a fault can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `create_buffer` is rejected
    CreateBuffer,
    /// `enqueue_write` is rejected
    Write,
    /// `wait_for_events` fails
    WaitEvents,
    /// `enqueue_syrk` is rejected
    Enqueue,
    /// `flush` fails
    Flush,
    /// The kernel itself fails while executing; seen by `wait_for_finish`
    Execute,
}

/// Host-visible call or device-side milestone, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Buffer allocated
    CreateBuffer {
        /// Total bytes including the offset
        bytes: usize,
        /// Requested access
        access: Access,
    },
    /// Write enqueued
    Write {
        /// Byte offset of the write
        offset: usize,
        /// Bytes written
        bytes: usize,
    },
    /// Write executed by the queue worker
    WriteDone,
    /// `wait_for_events` returned
    EventsWaited,
    /// Kernel enqueued
    EnqueueSyrk,
    /// Kernel executed by the queue worker
    KernelDone,
    /// `flush` returned
    Flush,
    /// `wait_for_finish` returned
    Finish,
}

type Job = Box<dyn FnOnce() + Send>;

/// Command queue backed by a worker thread
#[derive(Debug)]
pub struct SimQueue {
    id: usize,
    tx: Sender<Job>,
}

#[derive(Debug, Default)]
struct EventState {
    status: Mutex<Option<DeviceStatus>>,
    done: Condvar,
}

/// Completion event of a simulated command
#[derive(Debug, Clone, Default)]
pub struct SimEvent(Arc<EventState>);

impl SimEvent {
    fn complete(&self, status: DeviceStatus) {
        *lock(&self.0.status) = Some(status);
        self.0.done.notify_all();
    }

    /// Block until the command finished and return its status
    pub fn wait(&self) -> DeviceStatus {
        let mut status = lock(&self.0.status);
        loop {
            if let Some(s) = *status {
                return s;
            }
            status = self
                .0
                .done
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Status if the command already finished
    #[must_use]
    pub fn poll(&self) -> Option<DeviceStatus> {
        *lock(&self.0.status)
    }
}

/// Buffer in simulated device memory
///
/// Dropping the buffer returns its bytes to the device.
#[derive(Debug)]
pub struct SimBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    access: Access,
    allocated: Arc<AtomicU64>,
}

impl SimBuffer {
    /// Size in bytes, including the leading offset
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    /// Whether the buffer holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the buffer contents
    #[must_use]
    pub fn read(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        let bytes = lock(&self.data).len() as u64;
        self.allocated.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// Simulated accelerator
pub struct SimDevice {
    config: SimConfig,
    queues: Vec<SimQueue>,
    workers: Vec<JoinHandle<()>>,
    allocated: Arc<AtomicU64>,
    faults: Mutex<HashMap<FaultPoint, DeviceStatus>>,
    log: Arc<Mutex<Vec<Command>>>,
}

impl std::fmt::Debug for SimDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimDevice")
            .field("config", &self.config)
            .field("allocated", &self.allocated_bytes())
            .finish_non_exhaustive()
    }
}

impl SimDevice {
    /// Start a device with `config.queue_count` queue workers
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let mut queues = Vec::with_capacity(config.queue_count);
        let mut workers = Vec::with_capacity(config.queue_count);
        for id in 0..config.queue_count {
            let (tx, rx) = mpsc::channel::<Job>();
            workers.push(thread::spawn(move || {
                for job in rx {
                    job();
                }
            }));
            queues.push(SimQueue { id, tx });
        }
        Self {
            config,
            queues,
            workers,
            allocated: Arc::new(AtomicU64::new(0)),
            faults: Mutex::new(HashMap::new()),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every later call at `point` fail with `status`
    pub fn inject_fault(&self, point: FaultPoint, status: DeviceStatus) {
        lock(&self.faults).insert(point, status);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Bytes held by live buffers
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Snapshot of the command log
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.log).clone()
    }

    /// Empty the command log
    pub fn clear_commands(&self) {
        lock(&self.log).clear();
    }

    fn fault(&self, point: FaultPoint) -> DeviceResult<()> {
        match lock(&self.faults).get(&point) {
            Some(&status) => Err(status),
            None => Ok(()),
        }
    }

    fn record(&self, command: Command) {
        lock(&self.log).push(command);
    }

    fn owns(&self, queue: &SimQueue) -> bool {
        self.queues
            .get(queue.id)
            .is_some_and(|q| std::ptr::eq(q, queue))
    }

    fn submit(&self, queue: &SimQueue, job: Job) -> DeviceResult<()> {
        queue
            .tx
            .send(job)
            .map_err(|_| DeviceStatus::INVALID_COMMAND_QUEUE)
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        // Closing the channels ends the worker loops
        self.queues.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl DeviceBackend for SimDevice {
    type Buffer = SimBuffer;
    type Queue = SimQueue;
    type Event = SimEvent;

    fn device_name(&self) -> String {
        self.config.name.clone()
    }

    fn available_global_memory(&self, device_index: usize) -> u64 {
        if device_index != 0 {
            return 0;
        }
        self.config.global_mem.saturating_sub(self.allocated_bytes())
    }

    fn max_alloc_size(&self) -> u64 {
        self.config.max_alloc
    }

    fn supports_double_precision(&self) -> bool {
        self.config.double_precision
    }

    fn use_alpha(&self) -> bool {
        self.config.use_alpha
    }

    fn use_beta(&self) -> bool {
        self.config.use_beta
    }

    fn command_queues(&self) -> &[SimQueue] {
        &self.queues
    }

    fn create_buffer(&self, data: &[u8], byte_offset: usize, access: Access) -> DeviceResult<SimBuffer> {
        self.fault(FaultPoint::CreateBuffer)?;
        let bytes =
            buffer_bytes(byte_offset, data.len(), 1).ok_or(DeviceStatus::INVALID_BUFFER_SIZE)?;
        if bytes == 0 || bytes as u64 > self.config.max_alloc {
            return Err(DeviceStatus::INVALID_BUFFER_SIZE);
        }
        if self.allocated_bytes() + bytes as u64 > self.config.global_mem {
            return Err(DeviceStatus::MEM_OBJECT_ALLOCATION_FAILURE);
        }

        let mut storage = vec![0u8; bytes];
        storage[byte_offset..].copy_from_slice(data);
        self.allocated.fetch_add(bytes as u64, Ordering::SeqCst);
        self.record(Command::CreateBuffer { bytes, access });
        debug!(bytes, ?access, "sim buffer created");

        Ok(SimBuffer {
            data: Arc::new(Mutex::new(storage)),
            access,
            allocated: Arc::clone(&self.allocated),
        })
    }

    fn enqueue_write(
        &self,
        queue: &SimQueue,
        buffer: &SimBuffer,
        byte_offset: usize,
        data: &[u8],
    ) -> DeviceResult<SimEvent> {
        self.fault(FaultPoint::Write)?;
        if !self.owns(queue) {
            return Err(DeviceStatus::INVALID_COMMAND_QUEUE);
        }
        if buffer_bytes(byte_offset, data.len(), 1).map_or(true, |end| end > buffer.len()) {
            return Err(DeviceStatus::INVALID_VALUE);
        }
        self.record(Command::Write {
            offset: byte_offset,
            bytes: data.len(),
        });

        let event = SimEvent::default();
        let done = event.clone();
        let target = Arc::clone(&buffer.data);
        let payload = data.to_vec();
        let log = Arc::clone(&self.log);
        self.submit(
            queue,
            Box::new(move || {
                lock(&target)[byte_offset..byte_offset + payload.len()].copy_from_slice(&payload);
                lock(&log).push(Command::WriteDone);
                done.complete(DeviceStatus::SUCCESS);
            }),
        )?;
        Ok(event)
    }

    fn wait_for_events(&self, events: &[SimEvent]) -> DeviceResult<()> {
        self.fault(FaultPoint::WaitEvents)?;
        for event in events {
            let status = event.wait();
            if !status.is_success() {
                return Err(status);
            }
        }
        self.record(Command::EventsWaited);
        Ok(())
    }

    fn enqueue_syrk<T: Element>(
        &self,
        call: &SyrkCall<'_, T, SimBuffer>,
        queues: &[SimQueue],
        wait_list: &[SimEvent],
    ) -> DeviceResult<SimEvent> {
        self.fault(FaultPoint::Enqueue)?;
        let queue = queues.first().ok_or(DeviceStatus::INVALID_VALUE)?;
        if !self.owns(queue) {
            return Err(DeviceStatus::INVALID_COMMAND_QUEUE);
        }
        if call.shape.n == 0 || call.shape.k == 0 {
            return Err(DeviceStatus::INVALID_VALUE);
        }
        if call.c.access != Access::ReadWrite {
            return Err(DeviceStatus::INVALID_MEM_OBJECT);
        }
        let size = std::mem::size_of::<T>();
        let fits = |offset: usize, extent: usize, buffer: &SimBuffer| {
            buffer_bytes(offset, extent, size).is_some_and(|bytes| bytes <= buffer.len())
        };
        if !fits(call.off_a, call.shape.a_extent(), call.a)
            || !fits(call.off_c, call.shape.c_extent(), call.c)
        {
            return Err(DeviceStatus::INVALID_VALUE);
        }
        self.record(Command::EnqueueSyrk);

        let event = SimEvent::default();
        let done = event.clone();
        let deps = wait_list.to_vec();
        let a = Arc::clone(&call.a.data);
        let c = Arc::clone(&call.c.data);
        let (shape, alpha, beta, off_a, off_c) =
            (call.shape, call.alpha, call.beta, call.off_a, call.off_c);
        let failure = lock(&self.faults).get(&FaultPoint::Execute).copied();
        let delay = self.config.kernel_delay;
        let log = Arc::clone(&self.log);

        self.submit(
            queue,
            Box::new(move || {
                if let Some(status) = deps.iter().map(SimEvent::wait).find(|s| !s.is_success()) {
                    done.complete(status);
                    return;
                }
                if let Some(status) = failure {
                    done.complete(status);
                    return;
                }
                let a_range = off_a * size..(off_a + shape.a_extent()) * size;
                let c_range = off_c * size..(off_c + shape.c_extent()) * size;
                let a_elems: Vec<T> = bytemuck::pod_collect_to_vec(&lock(&a)[a_range]);
                let mut c_bytes = lock(&c);
                let mut c_elems: Vec<T> = bytemuck::pod_collect_to_vec(&c_bytes[c_range.clone()]);
                reference::syrk(&shape, alpha, &a_elems, beta, &mut c_elems);
                c_bytes[c_range].copy_from_slice(bytemuck::cast_slice(&c_elems));
                drop(c_bytes);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                lock(&log).push(Command::KernelDone);
                done.complete(DeviceStatus::SUCCESS);
            }),
        )?;
        Ok(event)
    }

    fn flush(&self, queues: &[SimQueue]) -> DeviceResult<()> {
        self.fault(FaultPoint::Flush)?;
        if queues.iter().any(|q| !self.owns(q)) {
            return Err(DeviceStatus::INVALID_COMMAND_QUEUE);
        }
        self.record(Command::Flush);
        Ok(())
    }

    fn wait_for_finish(&self, queues: &[SimQueue], event: &SimEvent) -> DeviceResult<()> {
        let status = event.wait();
        if !status.is_success() {
            return Err(status);
        }
        // Drain everything queued behind the event
        for queue in queues {
            let marker = SimEvent::default();
            let signal = marker.clone();
            self.submit(queue, Box::new(move || signal.complete(DeviceStatus::SUCCESS)))?;
            marker.wait();
        }
        self.record(Command::Finish);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Variant;
    use crate::problem::ProblemDescriptor;

    fn device() -> SimDevice {
        SimDevice::new(SimConfig::default().with_memory(4096, 2048))
    }

    #[test]
    fn test_create_buffer_writes_at_offset_and_accounts() {
        let dev = device();
        let buf = dev.create_buffer(&[1, 2, 3], 4, Access::ReadOnly).unwrap();
        assert_eq!(buf.read(), vec![0, 0, 0, 0, 1, 2, 3]);
        assert_eq!(dev.allocated_bytes(), 7);
        assert_eq!(dev.available_global_memory(0), 4096 - 7);
        drop(buf);
        assert_eq!(dev.allocated_bytes(), 0);
    }

    #[test]
    fn test_allocation_limits() {
        let dev = device();
        assert_eq!(
            dev.create_buffer(&[0; 2049], 0, Access::ReadOnly).unwrap_err(),
            DeviceStatus::INVALID_BUFFER_SIZE
        );
        let _a = dev.create_buffer(&[0; 2048], 0, Access::ReadOnly).unwrap();
        let _b = dev.create_buffer(&[0; 2000], 0, Access::ReadOnly).unwrap();
        assert_eq!(
            dev.create_buffer(&[0; 100], 0, Access::ReadOnly).unwrap_err(),
            DeviceStatus::MEM_OBJECT_ALLOCATION_FAILURE
        );
    }

    #[test]
    fn test_write_completes_asynchronously() {
        let dev = device();
        let buf = dev.create_buffer(&[0; 8], 0, Access::ReadWrite).unwrap();
        let queue = &dev.command_queues()[0];
        let ev = dev.enqueue_write(queue, &buf, 2, &[9, 9]).unwrap();
        dev.wait_for_events(&[ev.clone()]).unwrap();
        assert_eq!(ev.poll(), Some(DeviceStatus::SUCCESS));
        assert_eq!(buf.read(), vec![0, 0, 9, 9, 0, 0, 0, 0]);
    }

    #[test]
    fn test_write_out_of_bounds_rejected() {
        let dev = device();
        let buf = dev.create_buffer(&[0; 4], 0, Access::ReadWrite).unwrap();
        let queue = &dev.command_queues()[0];
        assert_eq!(
            dev.enqueue_write(queue, &buf, 3, &[1, 1]).unwrap_err(),
            DeviceStatus::INVALID_VALUE
        );
    }

    #[test]
    fn test_syrk_rejects_read_only_c() {
        let dev = device();
        let shape = ProblemDescriptor::new(Variant::Real32, 2, 2).shape();
        let a = dev.create_buffer(&[0; 16], 0, Access::ReadOnly).unwrap();
        let c = dev.create_buffer(&[0; 16], 0, Access::ReadOnly).unwrap();
        let call = SyrkCall {
            shape,
            alpha: 1.0f32,
            a: &a,
            off_a: 0,
            beta: 0.0,
            c: &c,
            off_c: 0,
        };
        assert_eq!(
            dev.enqueue_syrk(&call, dev.command_queues(), &[]).unwrap_err(),
            DeviceStatus::INVALID_MEM_OBJECT
        );
    }

    #[test]
    fn test_syrk_with_offsets_matches_host() {
        let dev = device();
        let shape = ProblemDescriptor::new(Variant::Real64, 2, 2).shape();
        let a_host = [1.0f64, 3.0, 2.0, 4.0];
        let a = dev
            .create_buffer(bytemuck::cast_slice(&a_host), 8, Access::ReadOnly)
            .unwrap();
        let c = dev
            .create_buffer(bytemuck::cast_slice(&[0.0f64; 4]), 16, Access::ReadWrite)
            .unwrap();
        let call = SyrkCall {
            shape,
            alpha: 1.0f64,
            a: &a,
            off_a: 1,
            beta: 0.0,
            c: &c,
            off_c: 2,
        };
        let queues = dev.command_queues();
        let ev = dev.enqueue_syrk(&call, queues, &[]).unwrap();
        dev.flush(queues).unwrap();
        dev.wait_for_finish(queues, &ev).unwrap();
        let out: Vec<f64> = bytemuck::pod_collect_to_vec(&c.read()[16..]);
        assert_eq!(out, vec![5.0, 0.0, 11.0, 25.0]);
    }

    #[test]
    fn test_execute_fault_surfaces_at_finish() {
        let dev = device();
        dev.inject_fault(FaultPoint::Execute, DeviceStatus::EXEC_STATUS_ERROR);
        let shape = ProblemDescriptor::new(Variant::Real32, 1, 1).shape();
        let a = dev.create_buffer(&[0; 4], 0, Access::ReadOnly).unwrap();
        let c = dev.create_buffer(&[0; 4], 0, Access::ReadWrite).unwrap();
        let call = SyrkCall {
            shape,
            alpha: 1.0f32,
            a: &a,
            off_a: 0,
            beta: 1.0,
            c: &c,
            off_c: 0,
        };
        let queues = dev.command_queues();
        let ev = dev.enqueue_syrk(&call, queues, &[]).unwrap();
        dev.flush(queues).unwrap();
        assert_eq!(
            dev.wait_for_finish(queues, &ev).unwrap_err(),
            DeviceStatus::EXEC_STATUS_ERROR
        );
    }

    #[test]
    fn test_injected_fault_and_clear() {
        let dev = device();
        dev.inject_fault(FaultPoint::Flush, DeviceStatus::OUT_OF_HOST_MEMORY);
        assert_eq!(
            dev.flush(dev.command_queues()).unwrap_err(),
            DeviceStatus::OUT_OF_HOST_MEMORY
        );
        dev.clear_faults();
        assert!(dev.flush(dev.command_queues()).is_ok());
    }

    #[test]
    fn test_foreign_queue_rejected() {
        let dev = device();
        let other = device();
        let buf = dev.create_buffer(&[0; 4], 0, Access::ReadWrite).unwrap();
        assert_eq!(
            dev.enqueue_write(&other.command_queues()[0], &buf, 0, &[1])
                .unwrap_err(),
            DeviceStatus::INVALID_COMMAND_QUEUE
        );
    }

    #[test]
    fn test_only_device_zero_reports_memory() {
        let dev = device();
        assert_eq!(dev.available_global_memory(1), 0);
    }
}
