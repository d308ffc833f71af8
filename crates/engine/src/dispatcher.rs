//! Request dispatch
//!
//! Entry point of the engine. A request arrives as an ioctl number plus the
//! address of an envelope header in client memory. The dispatcher
//! validates the envelope, copies the payload in, runs the operation and
//! copies the payload back out, returning the status the emulated driver
//! would have returned.
//!
//! Interrupt requests only touch the [`InterruptGate`], so a thread blocked
//! in INT_WAIT never holds the session lock and INT_DISABLE from another
//! thread can always release it.

use crate::error::{EngineError, Result};
use crate::interrupt::{InterruptGate, WaitOutcome};
use crate::memory::UserMemory;
use crate::session::Session;
use protocol::types::CMD_WRITE_BYTE;
use protocol::version::fill_c_string;
use protocol::{
    CardRegister, DRIVER_VERSION, Event, Header, Interrupt, Opcode, PortTransfer,
    UsbGetDeviceData, UsbSetInterface, UsbTransfer, VersionInfo, Wire, WordSize, version_string,
};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Largest payload copied in whole from the client
///
/// MULTI_TRANSFER lists are not bound by it; they are walked one record at
/// a time.
pub const MAX_PAYLOAD: usize = 1 << 20;

/// What the caller should do with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Handled; return this status to the client
    Done(i32),
    /// Not an envelope of ours; hand the raw request to the real driver
    Forward,
    /// A valid envelope with an unknown opcode
    Unsupported,
}

/// Whether the payload copy is stored back after an operation
enum Writeback {
    Payload,
    Skip,
}

pub struct Dispatcher {
    session: Mutex<Session>,
    gate: InterruptGate,
    word: WordSize,
}

impl Dispatcher {
    pub fn new(session: Session) -> Self {
        let word = session.word_size();
        Self {
            session: Mutex::new(session),
            gate: InterruptGate::new(),
            word,
        }
    }

    pub fn word_size(&self) -> WordSize {
        self.word
    }

    /// Lock the hardware context
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn gate(&self) -> &InterruptGate {
        &self.gate
    }

    /// Handle one control request whose envelope header sits at `arg`
    pub fn handle(&self, request: u64, arg: u64, mem: &mut dyn UserMemory) -> Reply {
        let header = match mem
            .read_vec(arg, Header::wire_size(self.word))
            .and_then(|raw| Header::decode(&raw, self.word).map_err(EngineError::from))
        {
            Ok(header) => header,
            Err(e) => {
                debug!("Request {:#x}: no readable envelope ({}), forwarding", request, e);
                return Reply::Forward;
            }
        };
        if !header.is_valid() {
            debug!(
                "Request {:#x}: magic {:#x} mismatch, forwarding",
                request, header.magic
            );
            return Reply::Forward;
        }
        let Some(op) = Opcode::from_request(request) else {
            warn!("Unsupported request {:#x}", request);
            return Reply::Unsupported;
        };
        debug!("{} (payload {} bytes at {:#x})", op, header.size, header.data);

        match self.run(op, &header, mem) {
            Ok(()) => Reply::Done(0),
            Err(e) => {
                warn!("{} failed: {}", op, e);
                Reply::Done(e.status())
            }
        }
    }

    fn run(&self, op: Opcode, header: &Header, mem: &mut dyn UserMemory) -> Result<()> {
        if let Opcode::MultiTransfer = op {
            return self.multi_transfer(header, mem);
        }
        let size = header.size as usize;
        if size > MAX_PAYLOAD {
            return Err(EngineError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD,
            });
        }
        let mut payload = mem.read_vec(header.data, size)?;
        let outcome = self.execute(op, &mut payload, mem);
        // Results are copied back even when the operation failed part way,
        // so fields such as hCard reach the client.
        let writeback = match &outcome {
            Ok(w) => matches!(w, Writeback::Payload),
            Err(_) => !matches!(op, Opcode::IntWait),
        };
        if writeback {
            mem.write(header.data, &payload)?;
        }
        outcome.map(|_| ())
    }

    fn execute(&self, op: Opcode, payload: &mut [u8], mem: &mut dyn UserMemory) -> Result<Writeback> {
        let word = self.word;
        match op {
            Opcode::Version => {
                let mut info = VersionInfo::decode(payload, word)?;
                info.version = DRIVER_VERSION;
                fill_c_string(&mut info.text, &version_string());
                info.encode(payload, word)?;
            }
            Opcode::License | Opcode::EventUnregister => {}
            Opcode::IntEnable => {
                let mut it = Interrupt::decode(payload, word)?;
                self.gate.enable();
                it.enable_ok = 1;
                it.stopped = 0;
                it.encode(payload, word)?;
            }
            Opcode::IntDisable => {
                let mut it = Interrupt::decode(payload, word)?;
                self.gate.disable();
                it.counter = 0;
                it.stopped = 1;
                it.encode(payload, word)?;
            }
            Opcode::IntWait => {
                let mut it = Interrupt::decode(payload, word)?;
                let has_device = self.session().matched_device().is_some();
                match self.gate.wait(has_device) {
                    WaitOutcome::FirstWait => {
                        it.counter = self.gate.pending();
                        it.encode(payload, word)?;
                    }
                    // The client's struct may have been updated by a
                    // concurrent INT_DISABLE; leave it as it is now.
                    WaitOutcome::Disabled | WaitOutcome::Released => return Ok(Writeback::Skip),
                }
            }
            Opcode::CardRegister => {
                let mut card = CardRegister::decode(payload, word)?;
                let result = self.session().card_register(&mut card);
                card.encode(payload, word)?;
                result?;
            }
            Opcode::CardUnregister => {
                let card = CardRegister::decode(payload, word)?;
                self.session().card_unregister(&card);
            }
            Opcode::Transfer => {
                let mut tr = PortTransfer::decode(payload, word)?;
                self.session().port_transfer(&mut tr)?;
                tr.encode(payload, word)?;
            }
            // Walked in place by `run`.
            Opcode::MultiTransfer => return Ok(Writeback::Skip),
            Opcode::EventRegister => {
                let mut event = Event::decode(payload, word)?;
                self.session().event_register(&mut event)?;
                event.encode(payload, word)?;
            }
            Opcode::EventPull => {
                let mut event = Event::decode(payload, word)?;
                self.session().event_pull(&mut event);
                event.encode(payload, word)?;
            }
            Opcode::UsbSetInterface => {
                let sel = UsbSetInterface::decode(payload, word)?;
                self.session().usb_set_interface(&sel)?;
            }
            Opcode::UsbGetDeviceData => {
                let mut req = UsbGetDeviceData::decode(payload, word)?;
                self.session().usb_get_device_data(&mut req, mem)?;
                req.encode(payload, word)?;
            }
            Opcode::UsbTransfer => {
                let mut tr = UsbTransfer::decode(payload, word)?;
                let result = self.session().usb_transfer(&mut tr, mem);
                tr.encode(payload, word)?;
                result?;
            }
        }
        Ok(Writeback::Payload)
    }

    /// Run every record in order, reporting the first failure
    ///
    /// Each record is copied in, executed and copied back on its own.
    fn multi_transfer(&self, header: &Header, mem: &mut dyn UserMemory) -> Result<()> {
        let word = self.word;
        let stride = PortTransfer::wire_size(word);
        let count = header.size as usize / stride;
        let mut record = vec![0u8; stride];
        let mut session = self.session();
        let mut first_error = None;
        for i in 0..count {
            let addr = header.data + (i * stride) as u64;
            mem.read(addr, &mut record)?;
            let mut tr = PortTransfer::decode(&record, word)?;
            match session.port_transfer(&mut tr) {
                Ok(()) => {
                    tr.encode(&mut record, word)?;
                    mem.write(addr, &record)?;
                }
                Err(e) => {
                    warn!(
                        "Transfer {} ({} at {:#x}) failed: {}",
                        i,
                        if tr.command == CMD_WRITE_BYTE { "write" } else { "read" },
                        tr.port,
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!("Ran {} transfers", count);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
