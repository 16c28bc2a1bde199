//! Deterministic in-memory board.
//!
//! Implements [`Platform`] over a virtual clock and simulates 1-Wire devices
//! at slot level: reset pulses arm a presence window, short low pulses are
//! decoded as write or read slots depending on whether the master drives the
//! line back high or releases it, and read slots answer with the wired AND of
//! every transmitting device. Good enough to run the full protocol, including
//! the Search ROM walk, without hardware or real time.

// shared by the integration suites, each of which uses a different subset
#![allow(dead_code)]

use onewire::{PinId, Platform, Rom, crc8};
use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};

/// A simulated 1-Wire device.
pub struct Slave {
    rom: [u8; 8],
    pub scratchpad: [u8; 9],
    pub parasite: bool,
    pub present: bool,
    /// Answers the presence pulse but stays silent during a search, so both
    /// search read slots float high.
    pub mute: bool,
    /// When set, answers only this many more reset pulses; lets a test kill
    /// the bus part way through a multi-transaction sequence.
    pub presence_budget: Option<u32>,
    active: bool,
    selected: bool,
}

impl Slave {
    pub fn new(family_code: u8, serial: [u8; 6]) -> Self {
        Self::raw(*Rom::with_crc(family_code, serial).bytes())
    }

    /// A device with a verbatim ROM, crc byte included (corrupt at will).
    pub fn raw(rom: [u8; 8]) -> Self {
        let mut slave = Self {
            rom,
            scratchpad: [0x50, 0x05, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0x00],
            parasite: false,
            present: true,
            mute: false,
            presence_budget: None,
            active: false,
            selected: false,
        };
        slave.seal_scratchpad();
        slave
    }

    pub fn parasite(mut self, parasite: bool) -> Self {
        self.parasite = parasite;
        self
    }

    pub fn rom(&self) -> Rom {
        Rom::new(self.rom)
    }

    /// Stores a raw temperature count and refreshes the scratchpad crc.
    pub fn set_temperature(&mut self, raw: i16) {
        self.scratchpad[..2].copy_from_slice(&raw.to_le_bytes());
        self.seal_scratchpad();
    }

    pub fn seal_scratchpad(&mut self) {
        self.scratchpad[8] = crc8::calculate(&self.scratchpad[..8]);
    }

    pub fn corrupt_scratchpad(&mut self) {
        self.scratchpad[8] ^= 0xFF;
    }

    /// Whether the device answers the reset pulse that just went out,
    /// consuming its presence budget if one is set.
    fn answer_presence(&mut self) -> bool {
        if !self.present {
            return false;
        }
        match &mut self.presence_budget {
            Some(0) => false,
            Some(budget) => {
                *budget -= 1;
                true
            }
            None => true,
        }
    }

    fn bit(&self, index: u8) -> bool {
        self.rom[usize::from(index / 8)] >> (index % 8) & 1 != 0
    }

    fn scratchpad_bits(&self) -> Vec<bool> {
        self.scratchpad
            .iter()
            .flat_map(|byte| (0..8).map(move |index| byte >> index & 1 != 0))
            .collect()
    }
}

/// LSB-first bit collector for bytes the master writes.
#[derive(Default)]
struct Shift {
    byte: u8,
    count: u8,
}

impl Shift {
    fn push(&mut self, bit: bool) -> Option<u8> {
        if bit {
            self.byte |= 1 << self.count;
        }
        self.count += 1;
        if self.count == 8 {
            let byte = self.byte;
            *self = Self::default();
            Some(byte)
        } else {
            None
        }
    }
}

enum Step {
    EmitBit,
    EmitComplement,
    Choose,
}

enum Phase {
    Idle,
    /// Collecting the ROM command byte that follows a reset.
    Command(Shift),
    /// Collecting the 64 address bits of a MatchRom.
    Match { count: u8, rom: [u8; 8] },
    /// Search ROM: two read slots then the master's choice, per bit.
    Search { index: u8, step: Step },
    /// Collecting the function command byte.
    Function(Shift),
    /// Collecting the payload of a WriteScratchpad.
    Write { shift: Shift, bytes: Vec<u8> },
    /// Devices transmitting; read slots pop from the queue.
    Emit(VecDeque<bool>),
}

struct Line {
    slaves: Vec<Slave>,
    /// Time the master pulled the line low, while it is still low.
    fall_at: Option<u64>,
    /// Whether any device answered the most recent reset pulse.
    presence: bool,
    presence_until: u64,
    /// An open read slot the master has not sampled yet.
    slot_until: u64,
    phase: Phase,
    resets: u64,
    conversions: u64,
}

impl Line {
    fn new() -> Self {
        Self {
            slaves: Vec::new(),
            fall_at: None,
            presence: false,
            presence_until: 0,
            slot_until: 0,
            phase: Phase::Idle,
            resets: 0,
            conversions: 0,
        }
    }

    fn reset(&mut self, now: u64) {
        self.resets += 1;
        self.presence_until = now + 240;
        self.phase = Phase::Command(Shift::default());
        self.presence = false;
        for slave in &mut self.slaves {
            let answering = slave.answer_presence();
            self.presence |= answering;
            slave.active = answering && !slave.mute;
            slave.selected = false;
        }
    }

    /// The master drove the line back high or released it.
    fn rise(&mut self, now: u64, released: bool) {
        let Some(fall) = self.fall_at.take() else {
            return;
        };
        let low = now - fall;
        if low >= 480 {
            self.reset(now);
        } else if released {
            // a read slot: the master samples within 15us
            self.slot_until = now + 15;
        } else {
            // a write slot: short low is a one, long low a zero
            self.master_bit(low <= 15);
        }
    }

    fn master_bit(&mut self, bit: bool) {
        match &mut self.phase {
            Phase::Command(shift) => {
                let Some(byte) = shift.push(bit) else {
                    return;
                };
                self.phase = match byte {
                    0xCC => {
                        for slave in &mut self.slaves {
                            slave.selected = slave.active;
                        }
                        Phase::Function(Shift::default())
                    }
                    0x55 => Phase::Match {
                        count: 0,
                        rom: [0; 8],
                    },
                    0xF0 => Phase::Search {
                        index: 0,
                        step: Step::EmitBit,
                    },
                    _ => Phase::Idle,
                };
            }
            Phase::Match { count, rom } => {
                if bit {
                    rom[usize::from(*count / 8)] |= 1 << (*count % 8);
                }
                *count += 1;
                if *count == 64 {
                    for slave in &mut self.slaves {
                        slave.selected = slave.active && slave.rom == *rom;
                    }
                    self.phase = Phase::Function(Shift::default());
                }
            }
            Phase::Search { index, step } => {
                if let Step::Choose = step {
                    let position = *index;
                    for slave in &mut self.slaves {
                        if slave.active && slave.bit(position) != bit {
                            slave.active = false;
                        }
                    }
                    *index += 1;
                    *step = Step::EmitBit;
                    if *index == 64 {
                        self.phase = Phase::Idle;
                    }
                }
            }
            Phase::Function(shift) => {
                if let Some(byte) = shift.push(bit) {
                    self.phase = match byte {
                        0x44 => {
                            self.conversions += 1;
                            Phase::Idle
                        }
                        0xBE => Phase::Emit(self.scratchpad_queue()),
                        0x4E => Phase::Write {
                            shift: Shift::default(),
                            bytes: Vec::new(),
                        },
                        0xB4 => {
                            // parasite powered devices hold the slot low
                            let queue = self
                                .slaves
                                .iter()
                                .filter(|slave| slave.selected)
                                .fold(true, |level, slave| level && !slave.parasite);
                            Phase::Emit(VecDeque::from([queue]))
                        }
                        _ => Phase::Idle,
                    };
                }
            }
            Phase::Write { shift, bytes } => {
                if let Some(byte) = shift.push(bit) {
                    bytes.push(byte);
                    if bytes.len() == 3 {
                        let payload = [bytes[0], bytes[1], bytes[2]];
                        for slave in &mut self.slaves {
                            if slave.selected {
                                slave.scratchpad[2..5].copy_from_slice(&payload);
                                slave.seal_scratchpad();
                            }
                        }
                        self.phase = Phase::Idle;
                    }
                }
            }
            Phase::Idle | Phase::Emit(_) => {}
        }
    }

    /// Wired AND of the scratchpads of every selected device.
    fn scratchpad_queue(&self) -> VecDeque<bool> {
        let mut queue = VecDeque::new();
        for slave in self.slaves.iter().filter(|slave| slave.selected) {
            let bits = slave.scratchpad_bits();
            if queue.is_empty() {
                queue.extend(bits);
            } else {
                for (level, bit) in queue.iter_mut().zip(bits) {
                    *level &= bit;
                }
            }
        }
        queue
    }

    /// The level a read slot answers with.
    fn slave_output(&mut self) -> bool {
        match &mut self.phase {
            Phase::Emit(queue) => queue.pop_front().unwrap_or(true),
            Phase::Search { index, step } => {
                let position = *index;
                let emit = |complement: bool, slaves: &[Slave]| {
                    slaves
                        .iter()
                        .filter(|slave| slave.active)
                        .fold(true, |level, slave| {
                            level && (slave.bit(position) ^ complement)
                        })
                };
                match step {
                    Step::EmitBit => {
                        let level = emit(false, &self.slaves);
                        *step = Step::EmitComplement;
                        level
                    }
                    Step::EmitComplement => {
                        let level = emit(true, &self.slaves);
                        *step = Step::Choose;
                        level
                    }
                    Step::Choose => true,
                }
            }
            _ => true,
        }
    }

    fn read(&mut self, now: u64) -> bool {
        if now <= self.presence_until && self.presence {
            return false;
        }
        if now <= self.slot_until {
            self.slot_until = 0;
            return self.slave_output();
        }
        true
    }
}

struct Inner {
    now_us: u64,
    lines: BTreeMap<PinId, Line>,
}

/// The board: a virtual clock plus one simulated bus line per pin.
#[derive(Clone)]
pub struct Board(Rc<RefCell<Inner>>);

impl Board {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Inner {
            now_us: 0,
            lines: BTreeMap::new(),
        })))
    }

    pub fn attach(&self, pin: PinId, slave: Slave) {
        self.0
            .borrow_mut()
            .lines
            .entry(pin)
            .or_insert_with(Line::new)
            .slaves
            .push(slave);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.0.borrow_mut().now_us += ms * 1000;
    }

    /// Bus transactions so far: every transaction starts with a reset pulse.
    pub fn resets(&self, pin: PinId) -> u64 {
        self.0.borrow().lines[&pin].resets
    }

    /// ConvertTemperature commands received so far.
    pub fn conversions(&self, pin: PinId) -> u64 {
        self.0.borrow().lines[&pin].conversions
    }

    pub fn with_slave<R>(&self, pin: PinId, index: usize, f: impl FnOnce(&mut Slave) -> R) -> R {
        f(&mut self.0.borrow_mut().lines.get_mut(&pin).unwrap().slaves[index])
    }
}

impl Platform for Board {
    fn pin_init(&mut self, pin: PinId) {
        self.0.borrow_mut().lines.entry(pin).or_insert_with(Line::new);
    }

    fn set_output(&mut self, _pin: PinId) {}

    fn set_input(&mut self, pin: PinId) {
        let mut inner = self.0.borrow_mut();
        let now = inner.now_us;
        if let Some(line) = inner.lines.get_mut(&pin) {
            line.rise(now, true);
        }
    }

    fn write(&mut self, pin: PinId, level: bool) {
        let mut inner = self.0.borrow_mut();
        let now = inner.now_us;
        if let Some(line) = inner.lines.get_mut(&pin) {
            if level {
                line.rise(now, false);
            } else if line.fall_at.is_none() {
                line.fall_at = Some(now);
            }
        }
    }

    fn read(&mut self, pin: PinId) -> bool {
        let mut inner = self.0.borrow_mut();
        let now = inner.now_us;
        inner
            .lines
            .get_mut(&pin)
            .is_none_or(|line| line.read(now))
    }

    fn delay_us(&mut self, us: u32) {
        self.0.borrow_mut().now_us += u64::from(us);
    }

    fn now_ms(&self) -> u64 {
        self.0.borrow().now_us / 1000
    }
}
