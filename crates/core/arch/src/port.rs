//! x86 Port I/O operations

use core::arch::asm;

/// Write a byte to an I/O port
#[inline]
pub unsafe fn outb(port: u16, value: u8) {
    asm!("out dx, al", in("dx") port, in("al") value, options(nostack, preserves_flags));
}

/// Read a byte from an I/O port
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    asm!("in al, dx", out("al") value, in("dx") port, options(nostack, preserves_flags));
    value
}

/// Write a word (16-bit) to an I/O port
#[inline]
pub unsafe fn outw(port: u16, value: u16) {
    asm!("out dx, ax", in("dx") port, in("ax") value, options(nostack, preserves_flags));
}

/// Read a word (16-bit) from an I/O port
#[inline]
pub unsafe fn inw(port: u16) -> u16 {
    let value: u16;
    asm!("in ax, dx", out("ax") value, in("dx") port, options(nostack, preserves_flags));
    value
}

/// Small I/O delay (write to the POST code port)
#[inline]
pub unsafe fn io_wait() {
    outb(0x80, 0);
}

/// A single I/O port address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port(pub u16);

impl Port {
    /// The port `n` addresses above this one
    pub const fn offset(self, n: u16) -> Port {
        Port(self.0 + n)
    }

    #[inline]
    pub unsafe fn read_u8(self) -> u8 {
        inb(self.0)
    }

    #[inline]
    pub unsafe fn write_u8(self, value: u8) {
        outb(self.0, value)
    }

    #[inline]
    pub unsafe fn read_u16(self) -> u16 {
        inw(self.0)
    }

    #[inline]
    pub unsafe fn write_u16(self, value: u16) {
        outw(self.0, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_offset() {
        assert_eq!(Port(0x1F0).offset(7), Port(0x1F7));
    }
}
