//! Linux character-device buses: i2c-dev, spidev and the GPIO v1 line API

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd};
use std::path::Path;

use super::bus::{OutputLine, RegisterBus, StreamBus};

const I2C_SLAVE: u64 = 0x0703;

const SPI_IOC_WR_MODE: u64 = 0x4001_6B01;
const SPI_IOC_WR_BITS_PER_WORD: u64 = 0x4001_6B03;
const SPI_IOC_WR_MAX_SPEED_HZ: u64 = 0x4004_6B04;
/// SPI_IOC_MESSAGE(1)
const SPI_IOC_MESSAGE_1: u64 = 0x4020_6B00;

const GPIO_GET_LINEHANDLE_IOCTL: u64 = 0xC16C_B403;
const GPIOHANDLE_SET_LINE_VALUES_IOCTL: u64 = 0xC040_B409;
const GPIOHANDLES_MAX: usize = 64;
const GPIOHANDLE_REQUEST_OUTPUT: u32 = 1 << 1;

fn check(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// `/dev/i2c-N` bound to one slave address
pub struct I2cDevice {
    file: File,
}

impl I2cDevice {
    pub fn open(path: &Path, address: u16) -> io::Result<Self> {
        let file = open_rw(path)?;
        // SAFETY: I2C_SLAVE takes the address by value
        check(unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(address),
            )
        })?;
        log::debug!("I2C: opened {} at {:#04x}", path.display(), address);
        Ok(Self { file })
    }
}

impl RegisterBus for I2cDevice {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let written = self.file.write(bytes)?;
        if written != bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short i2c write: {written} of {}", bytes.len()),
            ));
        }
        Ok(())
    }
}

#[repr(C)]
#[derive(Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

/// `/dev/spidevB.C` configured for write-only transfers
pub struct SpiDevice {
    file: File,
    speed_hz: u32,
    bits_per_word: u8,
}

impl SpiDevice {
    pub fn open(path: &Path, mode: u8, bits_per_word: u8, speed_hz: u32) -> io::Result<Self> {
        let file = open_rw(path)?;
        let fd = file.as_raw_fd();
        // SAFETY: each request reads one value of the pointed-to width
        unsafe {
            check(libc::ioctl(fd, SPI_IOC_WR_MODE as _, &mode as *const u8))?;
            check(libc::ioctl(
                fd,
                SPI_IOC_WR_BITS_PER_WORD as _,
                &bits_per_word as *const u8,
            ))?;
            check(libc::ioctl(
                fd,
                SPI_IOC_WR_MAX_SPEED_HZ as _,
                &speed_hz as *const u32,
            ))?;
        }
        log::debug!(
            "SPI: opened {} mode {} {} bits {} Hz",
            path.display(),
            mode,
            bits_per_word,
            speed_hz
        );
        Ok(Self {
            file,
            speed_hz,
            bits_per_word,
        })
    }
}

impl StreamBus for SpiDevice {
    fn transfer(&mut self, bytes: &[u8]) -> io::Result<()> {
        let message = SpiIocTransfer {
            tx_buf: bytes.as_ptr() as u64,
            len: bytes.len() as u32,
            speed_hz: self.speed_hz,
            bits_per_word: self.bits_per_word,
            ..Default::default()
        };
        // SAFETY: the transfer only reads `len` bytes from `tx_buf`, which outlives the call
        check(unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                SPI_IOC_MESSAGE_1 as _,
                &message as *const SpiIocTransfer,
            )
        })?;
        Ok(())
    }
}

#[repr(C)]
struct GpioHandleRequest {
    line_offsets: [u32; GPIOHANDLES_MAX],
    flags: u32,
    default_values: [u8; GPIOHANDLES_MAX],
    consumer_label: [u8; 32],
    lines: u32,
    fd: libc::c_int,
}

#[repr(C)]
struct GpioHandleData {
    values: [u8; GPIOHANDLES_MAX],
}

/// One output line requested from `/dev/gpiochipN`
pub struct GpioLine {
    handle: File,
}

impl GpioLine {
    pub fn request(chip: &Path, line: u32, consumer: &str, initial: bool) -> io::Result<Self> {
        let chip_file = open_rw(chip)?;

        let mut request = GpioHandleRequest {
            line_offsets: [0; GPIOHANDLES_MAX],
            flags: GPIOHANDLE_REQUEST_OUTPUT,
            default_values: [0; GPIOHANDLES_MAX],
            consumer_label: [0; 32],
            lines: 1,
            fd: -1,
        };
        request.line_offsets[0] = line;
        request.default_values[0] = initial as u8;
        let label = consumer.as_bytes();
        let len = label.len().min(request.consumer_label.len() - 1);
        request.consumer_label[..len].copy_from_slice(&label[..len]);

        // SAFETY: the kernel fills `fd` in the request struct we own
        check(unsafe {
            libc::ioctl(
                chip_file.as_raw_fd(),
                GPIO_GET_LINEHANDLE_IOCTL as _,
                &mut request as *mut GpioHandleRequest,
            )
        })?;
        if request.fd < 0 {
            return Err(io::Error::other(format!(
                "no line handle for {}:{}",
                chip.display(),
                line
            )));
        }
        // SAFETY: the descriptor was just created for us and is owned by nobody else
        let handle = unsafe { File::from_raw_fd(request.fd) };
        log::debug!("GPIO: {}:{} requested as {}", chip.display(), line, consumer);
        Ok(Self { handle })
    }
}

impl OutputLine for GpioLine {
    fn set_value(&mut self, high: bool) -> io::Result<()> {
        let mut data = GpioHandleData {
            values: [0; GPIOHANDLES_MAX],
        };
        data.values[0] = high as u8;
        // SAFETY: the kernel reads the values array we own
        check(unsafe {
            libc::ioctl(
                self.handle.as_raw_fd(),
                GPIOHANDLE_SET_LINE_VALUES_IOCTL as _,
                &mut data as *mut GpioHandleData,
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_kernel_struct_layouts() {
        assert_eq!(mem::size_of::<SpiIocTransfer>(), 32);
        assert_eq!(mem::size_of::<GpioHandleRequest>(), 364);
        assert_eq!(mem::size_of::<GpioHandleData>(), 64);
    }

    #[test]
    fn test_open_missing_device_fails() {
        assert!(I2cDevice::open(Path::new("/nonexistent/i2c-99"), 0x3C).is_err());
        assert!(SpiDevice::open(Path::new("/nonexistent/spidev9.9"), 0, 8, 1_000_000).is_err());
        assert!(GpioLine::request(Path::new("/nonexistent/gpiochip9"), 1, "test", false).is_err());
    }
}
