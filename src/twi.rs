//! Contains the [`TwiMaster`] interrupt-driven I2C (TWI) master engine
//!
//! A transaction is a write phase, a read phase, or a write phase followed
//! by a repeated START and a read phase. The engine is driven one bus event
//! at a time from the peripheral's interrupt handler, through
//! [`TwiMaster::on_interrupt`]. Lost arbitration, bus errors and NAKs
//! restart the whole transaction, up to [`TWI_MAX_RETRIES`] times.
//!
//! When the transaction finishes the engine either calls a
//! [`TransferDone`] hook, still in interrupt context, or hands a
//! [`Blocker`] to the task queue, so that a thread blocked in
//! [`TwiMaster::write_read`] carries on.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, Operation};

use crate::{
    Blocker,
    config::{TWI_MAX_PHASE, TWI_MAX_RETRIES},
    tasks::Defer,
};

/// What the peripheral reports when it interrupts
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusStatus {
    /// Another master won arbitration
    pub arbitration_lost: bool,
    /// An illegal START or STOP was seen on the bus
    pub bus_error: bool,
    /// An address or data byte has been sent
    pub write_done: bool,
    /// A data byte has been received
    pub read_done: bool,
    /// The byte just sent was not acknowledged
    pub nak: bool,
}

/// Bus actions the engine asks the peripheral for
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Send a STOP condition
    Stop,
    /// ACK the byte just received, and clock in another
    ReceiveNext,
    /// NAK the byte just received, then send a STOP condition
    NakStop,
}

/// An I2C master peripheral
///
/// The engine calls these from inside a critical section, both from thread
/// context (to begin a transaction) and from the peripheral's interrupt.
pub trait TwiBus {
    /// Read and acknowledge the interrupt status
    fn status(&self) -> BusStatus;

    /// Send a (repeated) START then this address byte, R/W bit included
    fn start(&self, address: u8);

    /// Send a data byte
    fn write(&self, byte: u8);

    /// Fetch the byte just received
    fn read(&self) -> u8;

    /// Issue a bus command
    fn command(&self, command: Command);

    /// Clear a lost arbitration or bus error flag
    fn clear_fault(&self);

    /// Force the bus state machine back to idle
    fn release(&self);
}

impl<T: TwiBus + ?Sized> TwiBus for &T {
    fn status(&self) -> BusStatus {
        T::status(self)
    }

    fn start(&self, address: u8) {
        T::start(self, address)
    }

    fn write(&self, byte: u8) {
        T::write(self, byte)
    }

    fn read(&self) -> u8 {
        T::read(self)
    }

    fn command(&self, command: Command) {
        T::command(self, command)
    }

    fn clear_fault(&self) {
        T::clear_fault(self)
    }

    fn release(&self) {
        T::release(self)
    }
}

/// The ways a transaction can fail
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Arbitration was lost, or the bus faulted, on every attempt
    ArbitrationLost,
    /// The target did not acknowledge, on every attempt
    SlaveNak,
    /// The peripheral reported something unexpected
    Unknown,
    /// A transaction is already in progress
    Busy,
    /// A phase is longer than the engine's buffers
    Overflow,
    /// The operations need a write phase after a read phase
    Unsupported,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::ArbitrationLost => write!(f, "I2C arbitration lost"),
            Error::SlaveNak => write!(f, "I2C target did not acknowledge"),
            Error::Unknown => write!(f, "unexpected I2C bus event"),
            Error::Busy => write!(f, "I2C transaction already in progress"),
            Error::Overflow => write!(f, "I2C transfer too long"),
            Error::Unsupported => write!(f, "I2C write after read in one transaction"),
        }
    }
}

impl core::error::Error for Error {}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::SlaveNak => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Error::Unknown => ErrorKind::Bus,
            Error::Busy | Error::Overflow | Error::Unsupported => ErrorKind::Other,
        }
    }
}

/// Told when a transaction finishes
pub trait TransferDone: Sync {
    /// Called from interrupt context with the outcome
    fn done(&self, status: Result<(), Error>);
}

/// What the engine does when a transaction finishes
#[derive(Copy, Clone)]
pub enum Completion {
    /// Call the hook from the interrupt. Transfer calls return as soon as
    /// the transaction has started.
    Notify(&'static dyn TransferDone),
    /// Defer `blocker` onto `tasks`. Transfer calls block the calling
    /// thread until the transaction finishes.
    Resume {
        /// Parks the thread making the call
        blocker: &'static Blocker,
        /// The task queue the home thread drains
        tasks: &'static dyn Defer,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Writing,
    Reading,
}

/// The transaction in flight (or the last one)
struct Transfer<const BUF: usize> {
    address: u8,
    tx: heapless::Vec<u8, BUF>,
    sent: usize,
    rx: heapless::Vec<u8, BUF>,
    rx_len: usize,
    retries: u8,
    phase: Phase,
    outcome: Option<Result<(), Error>>,
}

impl<const BUF: usize> Transfer<BUF> {
    const fn new() -> Transfer<BUF> {
        Transfer {
            address: 0,
            tx: heapless::Vec::new(),
            sent: 0,
            rx: heapless::Vec::new(),
            rx_len: 0,
            retries: 0,
            phase: Phase::Idle,
            outcome: None,
        }
    }

    fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Go back to the first phase, ready for a START
    fn rewind(&mut self) {
        self.sent = 0;
        self.rx.clear();
        self.phase = if self.tx.is_empty() && self.rx_len > 0 {
            Phase::Reading
        } else {
            Phase::Writing
        };
    }

    /// The address byte for the current phase
    fn address_byte(&self) -> u8 {
        let read = u8::from(self.phase == Phase::Reading);
        (self.address << 1) | read
    }
}

/// An interrupt-driven I2C master
///
/// `BUF` is the longest write phase and the longest read phase the engine
/// will accept (at most 255 bytes each). One transaction runs at a time;
/// starting another while one is in flight fails with [`Error::Busy`].
pub struct TwiMaster<B, const BUF: usize> {
    bus: B,
    completion: Completion,
    transfer: Mutex<RefCell<Transfer<BUF>>>,
}

impl<B: TwiBus, const BUF: usize> TwiMaster<B, BUF> {
    /// Build an idle engine
    pub const fn new(bus: B, completion: Completion) -> TwiMaster<B, BUF> {
        assert!(BUF <= TWI_MAX_PHASE);
        TwiMaster {
            bus,
            completion,
            transfer: Mutex::new(RefCell::new(Transfer::new())),
        }
    }

    /// Get the bus peripheral
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Blocking `embedded-hal` access to this engine
    ///
    /// Returns `None` for an engine built with [`Completion::Notify`], which
    /// cannot wait for its transfers.
    pub fn blocking(&self) -> Option<Blocking<'_, B, BUF>> {
        match self.completion {
            Completion::Resume { .. } => Some(Blocking { twi: self }),
            Completion::Notify(_) => None,
        }
    }

    /// Begin a transaction: write `tx` to the 7-bit `address`, then read
    /// `rx_len` bytes back
    ///
    /// With nothing to write, the transaction goes straight to the read
    /// phase. With nothing to write or read it only addresses the target.
    pub fn start(&self, address: u8, tx: &[u8], rx_len: usize) -> Result<(), Error> {
        if rx_len > BUF {
            return Err(Error::Overflow);
        }
        critical_section::with(|cs| {
            let mut transfer = self.transfer.borrow_ref_mut(cs);
            if transfer.is_busy() {
                return Err(Error::Busy);
            }
            transfer.tx.clear();
            transfer
                .tx
                .extend_from_slice(tx)
                .map_err(|_| Error::Overflow)?;
            transfer.address = address;
            transfer.rx_len = rx_len;
            transfer.retries = 0;
            transfer.outcome = None;
            transfer.rewind();
            debug!(
                "I2C start {=u8:02x}, {=usize} out, {=usize} in",
                address,
                tx.len(),
                rx_len
            );
            self.bus.start(transfer.address_byte());
            Ok(())
        })
    }

    /// Write `tx` then read `rx.len()` bytes into `rx`, with a repeated
    /// START between them
    ///
    /// With [`Completion::Resume`], this blocks the calling thread until the
    /// transaction is done. With [`Completion::Notify`], it returns once the
    /// transaction has started; collect the bytes with
    /// [`TwiMaster::received`] when the hook fires.
    pub fn write_read(&self, address: u8, tx: &[u8], rx: &mut [u8]) -> Result<(), Error> {
        self.start(address, tx, rx.len())?;
        let Completion::Resume { blocker, .. } = self.completion else {
            return Ok(());
        };
        while self.is_busy() {
            blocker.block();
        }
        self.outcome().unwrap_or(Err(Error::Unknown))?;
        self.received(rx);
        Ok(())
    }

    /// Write `tx`
    pub fn write(&self, address: u8, tx: &[u8]) -> Result<(), Error> {
        self.write_read(address, tx, &mut [])
    }

    /// Read `rx.len()` bytes
    pub fn read(&self, address: u8, rx: &mut [u8]) -> Result<(), Error> {
        self.write_read(address, &[], rx)
    }

    /// Copy the bytes received by the last transaction into `out`
    ///
    /// Returns how many bytes were copied.
    pub fn received(&self, out: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            let transfer = self.transfer.borrow_ref(cs);
            let count = out.len().min(transfer.rx.len());
            out[..count].copy_from_slice(&transfer.rx[..count]);
            count
        })
    }

    /// The outcome of the last transaction, or `None` while it is running
    pub fn outcome(&self) -> Option<Result<(), Error>> {
        critical_section::with(|cs| self.transfer.borrow_ref(cs).outcome)
    }

    /// Is a transaction in flight?
    pub fn is_busy(&self) -> bool {
        critical_section::with(|cs| self.transfer.borrow_ref(cs).is_busy())
    }

    /// Service the peripheral interrupt
    pub fn on_interrupt(&self) {
        let finished = critical_section::with(|cs| {
            let mut transfer = self.transfer.borrow_ref_mut(cs);
            let status = self.bus.status();
            if !transfer.is_busy() {
                warn!("I2C interrupt with nothing in flight: {}", status);
                return None;
            }
            let outcome = self.step(&mut transfer, status)?;
            transfer.phase = Phase::Idle;
            transfer.outcome = Some(outcome);
            Some(outcome)
        });
        if let Some(outcome) = finished {
            self.finish(outcome);
        }
    }

    /// Handle one bus event. Returns the outcome if the transaction is over.
    fn step(&self, transfer: &mut Transfer<BUF>, status: BusStatus) -> Option<Result<(), Error>> {
        if status.arbitration_lost || status.bus_error {
            self.bus.clear_fault();
            // Nobody owns the bus now, so no STOP
            return self.retry(transfer, Error::ArbitrationLost);
        }

        if status.write_done && status.nak {
            self.bus.release();
            let outcome = self.retry(transfer, Error::SlaveNak);
            if outcome.is_some() {
                self.bus.command(Command::Stop);
            }
            return outcome;
        }

        if status.write_done && transfer.phase == Phase::Writing {
            if let Some(&byte) = transfer.tx.get(transfer.sent) {
                transfer.sent += 1;
                self.bus.write(byte);
                return None;
            }
            if transfer.rx_len > 0 {
                transfer.phase = Phase::Reading;
                self.bus.start(transfer.address_byte());
                return None;
            }
            self.bus.command(Command::Stop);
            return Some(Ok(()));
        }

        if status.read_done && transfer.phase == Phase::Reading {
            let byte = self.bus.read();
            // `start` limited rx_len to the buffer size
            let _ = transfer.rx.push(byte);
            if transfer.rx.len() < transfer.rx_len {
                self.bus.command(Command::ReceiveNext);
                return None;
            }
            self.bus.command(Command::NakStop);
            return Some(Ok(()));
        }

        error!("Unexpected I2C status {}", status);
        self.bus.command(Command::Stop);
        Some(Err(Error::Unknown))
    }

    /// Restart the transaction, or give up with `error` if out of retries
    fn retry(&self, transfer: &mut Transfer<BUF>, error: Error) -> Option<Result<(), Error>> {
        if transfer.retries >= TWI_MAX_RETRIES {
            warn!("I2C failed after {=u8} retries: {}", transfer.retries, error);
            return Some(Err(error));
        }
        transfer.retries += 1;
        trace!("I2C retry {=u8} after {}", transfer.retries, error);
        transfer.rewind();
        self.bus.start(transfer.address_byte());
        None
    }

    fn finish(&self, outcome: Result<(), Error>) {
        match self.completion {
            Completion::Notify(hook) => hook.done(outcome),
            Completion::Resume { blocker, tasks } => {
                if !tasks.defer(blocker) {
                    error!("Could not queue I2C completion");
                }
            }
        }
    }
}

/// An [`embedded_hal::i2c::I2c`] for a [`TwiMaster`] that blocks the
/// calling thread
///
/// Get one from [`TwiMaster::blocking`]. Each `transaction` is one bus
/// transaction: adjacent writes are sent back to back, then adjacent reads
/// are clocked in after a single repeated START. The engine has no way to
/// write again after reading, so such sequences fail with
/// [`Error::Unsupported`] before anything goes on the bus.
pub struct Blocking<'a, B, const BUF: usize> {
    twi: &'a TwiMaster<B, BUF>,
}

impl<B: TwiBus, const BUF: usize> embedded_hal::i2c::ErrorType for Blocking<'_, B, BUF> {
    type Error = Error;
}

impl<B: TwiBus, const BUF: usize> embedded_hal::i2c::I2c for Blocking<'_, B, BUF> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let first_read = operations
            .iter()
            .position(|op| matches!(op, Operation::Read(_)))
            .unwrap_or(operations.len());
        let (writes, reads) = operations.split_at_mut(first_read);
        if reads.iter().any(|op| matches!(op, Operation::Write(_))) {
            return Err(Error::Unsupported);
        }

        let mut tx: heapless::Vec<u8, BUF> = heapless::Vec::new();
        for op in writes.iter() {
            if let Operation::Write(bytes) = op {
                tx.extend_from_slice(bytes).map_err(|_| Error::Overflow)?;
            }
        }
        let rx_len: usize = reads
            .iter()
            .map(|op| match op {
                Operation::Read(buf) => buf.len(),
                Operation::Write(_) => 0,
            })
            .sum();
        let mut scratch = [0u8; BUF];
        let rx = scratch.get_mut(..rx_len).ok_or(Error::Overflow)?;

        self.twi.write_read(address, &tx, rx)?;

        let mut rest: &[u8] = rx;
        for op in reads.iter_mut() {
            if let Operation::Read(buf) = op {
                let (head, tail) = rest.split_at(buf.len());
                buf.copy_from_slice(head);
                rest = tail;
            }
        }
        Ok(())
    }
}


// End of File
