//! # VideoCore Mailbox Driver
//!
//! Synchronous request/response transport to the VideoCore firmware.
//! The framebuffer negotiation uses the dedicated framebuffer channel: the
//! host posts the bus address of the shared descriptor and blocks until the
//! firmware posts a status word back on the same channel.
//!
//! ## Reference
//! - https://github.com/raspberrypi/firmware/wiki/Mailboxes

use core::ptr::{read_volatile, write_volatile};
use std::time::{Duration, Instant};

use log::{debug, trace};
use thiserror::Error;

/// Mailbox register offsets from base
const MAILBOX_READ: usize = 0x00;
const MAILBOX_STATUS: usize = 0x18;
const MAILBOX_WRITE: usize = 0x20;

/// Status register bits
const MAILBOX_FULL: u32 = 0x8000_0000;
const MAILBOX_EMPTY: u32 = 0x4000_0000;

/// Mailbox channels
pub const CHANNEL_FRAMEBUFFER: u8 = 1;
pub const CHANNEL_PROPERTY: u8 = 8;

/// Low four bits of a mailbox word carry the channel
const CHANNEL_MASK: u32 = 0xF;

/// Mailbox communication errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// Channel number does not fit in the low four bits
    #[error("invalid mailbox channel {0}")]
    InvalidChannel(u8),
    /// Message address is not 16-byte aligned
    #[error("message address 0x{0:08x} is not 16-byte aligned")]
    Misaligned(u32),
    /// No response within the allotted time
    #[error("timed out waiting for the mailbox")]
    Timeout,
    /// Far side is gone (simulated or detached firmware)
    #[error("mailbox disconnected")]
    Disconnected,
    /// A timed-out request on this channel has not been answered yet
    #[error("reply to a timed-out request on channel {0} still outstanding")]
    Busy(u8),
}

/// Opaque synchronous channel to the GPU coprocessor.
///
/// Exactly one request may be outstanding: `call` does not return until the
/// response for `channel` arrived or `timeout` elapsed. A request that timed
/// out stays outstanding; further calls fail with [`MailboxError::Busy`]
/// until [`reset`](CoprocessorChannel::reset) has consumed its late reply.
pub trait CoprocessorChannel {
    /// Post `bus_address` on `channel` and wait for the 28-bit response word
    fn call(&mut self, channel: u8, bus_address: u32, timeout: Duration) -> Result<u32, MailboxError>;

    /// Wait up to `timeout` for the reply to a timed-out request and drop it
    fn reset(&mut self, timeout: Duration) -> Result<(), MailboxError>;
}

impl<T: CoprocessorChannel + ?Sized> CoprocessorChannel for &mut T {
    fn call(&mut self, channel: u8, bus_address: u32, timeout: Duration) -> Result<u32, MailboxError> {
        (**self).call(channel, bus_address, timeout)
    }

    fn reset(&mut self, timeout: Duration) -> Result<(), MailboxError> {
        (**self).reset(timeout)
    }
}

/// Mailbox driver for VideoCore communication
pub struct Mailbox {
    base: usize,
    /// Channel whose reply is still owed after a timeout
    outstanding: Option<u8>,
}

impl Mailbox {
    /// Create a new mailbox driver
    ///
    /// # Safety
    /// The base address must be a valid mapped address for the mailbox registers.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base,
            outstanding: None,
        }
    }

    /// Read from a mailbox register
    #[inline]
    fn read_reg(&self, offset: usize) -> u32 {
        unsafe { read_volatile((self.base + offset) as *const u32) }
    }

    /// Write to a mailbox register
    #[inline]
    fn write_reg(&self, offset: usize, value: u32) {
        unsafe { write_volatile((self.base + offset) as *mut u32, value) }
    }

    /// Spin while `busy` is set in the status register
    fn wait_status_clear(&self, busy: u32, deadline: Instant) -> Result<(), MailboxError> {
        while (self.read_reg(MAILBOX_STATUS) & busy) != 0 {
            if Instant::now() >= deadline {
                return Err(MailboxError::Timeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// Read words until one arrives for `channel`; others are discarded
    fn await_reply(&self, channel: u8, deadline: Instant) -> Result<u32, MailboxError> {
        loop {
            self.wait_status_clear(MAILBOX_EMPTY, deadline)?;

            let response = self.read_reg(MAILBOX_READ);
            if (response & CHANNEL_MASK) == u32::from(channel) {
                return Ok(response & !CHANNEL_MASK);
            }
            debug!(
                "discarding mailbox word 0x{:08x} for channel {}",
                response,
                response & CHANNEL_MASK
            );
            if Instant::now() >= deadline {
                return Err(MailboxError::Timeout);
            }
        }
    }
}

impl CoprocessorChannel for Mailbox {
    fn call(&mut self, channel: u8, bus_address: u32, timeout: Duration) -> Result<u32, MailboxError> {
        if u32::from(channel) > CHANNEL_MASK {
            return Err(MailboxError::InvalidChannel(channel));
        }
        if bus_address & CHANNEL_MASK != 0 {
            return Err(MailboxError::Misaligned(bus_address));
        }

        if let Some(pending) = self.outstanding {
            return Err(MailboxError::Busy(pending));
        }

        let deadline = Instant::now() + timeout;

        self.wait_status_clear(MAILBOX_FULL, deadline)?;
        trace!("mailbox write ch{} 0x{:08x}", channel, bus_address);
        self.write_reg(MAILBOX_WRITE, bus_address | u32::from(channel));

        self.await_reply(channel, deadline).map_err(|e| {
            if e == MailboxError::Timeout {
                self.outstanding = Some(channel);
            }
            e
        })
    }

    fn reset(&mut self, timeout: Duration) -> Result<(), MailboxError> {
        let channel = match self.outstanding {
            Some(channel) => channel,
            None => return Ok(()),
        };

        let late = self.await_reply(channel, Instant::now() + timeout)?;
        debug!("dropped late mailbox reply 0x{:08x} on channel {}", late, channel);
        self.outstanding = None;
        Ok(())
    }
}
