/*!
Executable code buffer.

One page-aligned, read/write/execute mapping with a single append cursor.
Code already emitted never moves; translated blocks refer to each other by
*offset* into this buffer, and link patching rewrites bytes addressed by
offset, so no raw code pointers are stored anywhere outside a running
call.

Capacity is fixed (no eviction). Writes past the end set a sticky overflow
flag instead of corrupting memory; the cache checks the flag after every
compilation and surfaces it as the fatal `CodeBufferFull` error.
*/

use log::debug;

pub const DEFAULT_CAPACITY: usize = 0x100000;

pub struct CodeBuffer {
    data: *mut u8,
    len: usize,
    capacity: usize,
    overflowed: bool,
}

// The buffer is only ever used from the emulation thread; the raw pointer
// just isn't Send by default.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Map `capacity` bytes (rounded up to whole pages) with RWX
    /// permission.
    pub fn new(capacity: usize) -> std::io::Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let capacity = capacity.div_ceil(page) * page;

        let data = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if data == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        debug!("code buffer mapped: {capacity:#x} bytes rwx");

        Ok(Self {
            data: data as *mut u8,
            len: 0,
            capacity,
            overflowed: false,
        })
    }

    /// Current append cursor, also the offset the next emitted byte gets.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True once any write has run past capacity. Emitted bytes up to the
    /// overflow point are valid; nothing past it was written.
    #[inline]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    #[inline]
    pub fn push_u8(&mut self, byte: u8) {
        if self.len + 1 > self.capacity {
            self.overflowed = true;
            return;
        }
        unsafe { self.data.add(self.len).write(byte) };
        self.len += 1;
    }

    #[inline]
    pub fn push_u32(&mut self, word: u32) {
        for b in word.to_le_bytes() {
            self.push_u8(b);
        }
    }

    /// Executable address of `offset`. Valid for the lifetime of the
    /// buffer; emitted code never moves.
    #[inline]
    pub fn ptr_at(&self, offset: u32) -> *const u8 {
        debug_assert!((offset as usize) < self.capacity);
        unsafe { self.data.add(offset as usize) }
    }

    /// Rewrite 4 bytes at `offset` (link patching). The offset must point
    /// into already-emitted code; after an overflow the slot may never
    /// have been written, and the patch is dropped along with the buffer.
    pub fn patch_u32(&mut self, offset: u32, word: u32) {
        let offset = offset as usize;
        if offset + 4 > self.len {
            debug_assert!(self.overflowed, "patch outside emitted code");
            return;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(word.to_le_bytes().as_ptr(), self.data.add(offset), 4);
        }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.data as *mut libc::c_void, self.capacity);
        }
    }
}
