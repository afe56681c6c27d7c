//! A thread makes blocking I2C calls while the main thread plays the part
//! of the peripheral interrupt and runs the task queue
//!
//! This checks the whole path: the caller blocks, the interrupt finishes
//! the transaction and defers the resume, and the task queue switches back
//! into the caller with its data.

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    sync::{Mutex, OnceLock, mpsc},
    time::Duration,
};

use embedded_hal::i2c::{I2c, Operation};
use steep::{
    Blocker, Tasks, ThreadId, Threads, TwiMaster,
    twi::{self, BusStatus, Command, Completion, TwiBus},
};

/// The address our simulated register device answers on
const DEVICE: u8 = 0x50;

/// The state of the simulated bus and the device on it
struct Wire {
    irq: Option<BusStatus>,
    registers: [u8; 256],
    pointer: u8,
    expect_pointer: bool,
    last_read: u8,
    stops: usize,
}

/// A peripheral with one auto-incrementing register device attached.
/// Every bus action raises the interrupt the real hardware would.
struct FakeBus(Mutex<Wire>);

impl FakeBus {
    const fn new() -> FakeBus {
        FakeBus(Mutex::new(Wire {
            irq: None,
            registers: [0; 256],
            pointer: 0,
            expect_pointer: false,
            last_read: 0,
            stops: 0,
        }))
    }

    fn interrupt_pending(&self) -> bool {
        self.0.lock().unwrap().irq.is_some()
    }

    fn stops(&self) -> usize {
        self.0.lock().unwrap().stops
    }
}

const ACK: BusStatus = BusStatus {
    arbitration_lost: false,
    bus_error: false,
    write_done: true,
    read_done: false,
    nak: false,
};

const RECEIVED: BusStatus = BusStatus {
    write_done: false,
    read_done: true,
    ..ACK
};

impl Wire {
    fn clock_out(&mut self) {
        self.last_read = self.registers[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        self.irq = Some(RECEIVED);
    }
}

impl TwiBus for FakeBus {
    fn status(&self) -> BusStatus {
        self.0.lock().unwrap().irq.take().unwrap_or_default()
    }

    fn start(&self, address: u8) {
        let mut wire = self.0.lock().unwrap();
        if address >> 1 != DEVICE {
            wire.irq = Some(BusStatus { nak: true, ..ACK });
        } else if address & 1 == 1 {
            wire.clock_out();
        } else {
            wire.expect_pointer = true;
            wire.irq = Some(ACK);
        }
    }

    fn write(&self, byte: u8) {
        let mut wire = self.0.lock().unwrap();
        if wire.expect_pointer {
            wire.pointer = byte;
            wire.expect_pointer = false;
        } else {
            let pointer = usize::from(wire.pointer);
            wire.registers[pointer] = byte;
            wire.pointer = wire.pointer.wrapping_add(1);
        }
        wire.irq = Some(ACK);
    }

    fn read(&self) -> u8 {
        self.0.lock().unwrap().last_read
    }

    fn command(&self, command: Command) {
        let mut wire = self.0.lock().unwrap();
        match command {
            Command::ReceiveNext => wire.clock_out(),
            Command::Stop | Command::NakStop => wire.stops += 1,
        }
    }

    fn clear_fault(&self) {}

    fn release(&self) {}
}

const STACK: usize = 128 * 1024;

static THREADS: Threads<2, STACK> = Threads::new();
static TASKS: Tasks<4> = Tasks::new();
static WAIT: Blocker = Blocker::new(&THREADS, ThreadId::MAIN);
static TWI: TwiMaster<FakeBus, 8> = TwiMaster::new(
    FakeBus::new(),
    Completion::Resume {
        blocker: &WAIT,
        tasks: &TASKS,
    },
);
static REPORT: OnceLock<mpsc::Sender<String>> = OnceLock::new();
static WORKER: OnceLock<ThreadId> = OnceLock::new();

fn report(message: String) {
    let _ = REPORT.get().map(|tx| tx.send(message));
}

/// Stands in for the hardware and the main loop
fn home_thread() -> ! {
    if let Some(&worker) = WORKER.get() {
        THREADS.switch_to(worker);
    }
    loop {
        if TWI.bus().interrupt_pending() {
            TWI.on_interrupt();
        }
        TASKS.run();
    }
}

fn park_forever() -> ! {
    loop {
        std::thread::park();
    }
}

fn worker_thread() -> ! {
    let Some(mut bus) = TWI.blocking() else {
        report("engine does not block".into());
        park_forever()
    };

    let wrote = bus.write(DEVICE, &[0x10, 0xDE, 0xAD, 0xBE]);
    report(format!("write {:?}", wrote));

    let mut rx = [0u8; 3];
    let read = bus.write_read(DEVICE, &[0x10], &mut rx);
    report(format!("write_read {:?} {:02x?}", read, rx));

    let mut rx = [0u8; 2];
    let read = TWI.read(DEVICE, &mut rx);
    report(format!("read {:?} {:02x?}", read, rx));

    // Adjacent writes are one phase: the pointer byte, then the data
    let wrote = bus.transaction(
        DEVICE,
        &mut [Operation::Write(&[0x20]), Operation::Write(&[0x11, 0x22])],
    );
    let mut first = [0u8; 1];
    let mut second = [0u8; 1];
    let read = bus.transaction(
        DEVICE,
        &mut [
            Operation::Write(&[0x20]),
            Operation::Read(&mut first),
            Operation::Read(&mut second),
        ],
    );
    report(format!(
        "split {:?} {:?} {:02x?} {:02x?}",
        wrote, read, first, second
    ));

    let missing = bus.write(0x22, &[0x00]);
    report(format!("missing {:?}", missing));

    report(format!("stops {}", TWI.bus().stops()));
    park_forever()
}

fn start() -> ! {
    THREADS.start_main()
}

#[test]
fn blocking_calls_resume_with_their_data() {
    let (tx, rx) = mpsc::channel();
    REPORT.set(tx).unwrap();
    THREADS.create("home", home_thread);
    WORKER.set(THREADS.create("worker", worker_thread)).unwrap();
    std::thread::spawn(|| {
        start();
    });

    let reports: Vec<String> = (0..6)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(
        reports,
        [
            "write Ok(())",
            "write_read Ok(()) [de, ad, be]",
            // The pointer carried on from the last read
            "read Ok(()) [00, 00]",
            "split Ok(()) Ok(()) [11] [22]",
            "missing Err(SlaveNak)",
            "stops 6",
        ]
    );
    assert!(!TWI.is_busy());
    assert_eq!(TWI.outcome(), Some(Err(twi::Error::SlaveNak)));
    assert!(!WAIT.is_parked());
    assert_eq!(TASKS.pending(), 0);
}

// End of File
