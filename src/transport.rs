//! USB access for the pedal configuration interface.
//!
//! [`Transport`] is the small surface the device session needs: claim and
//! release an interface, and do interrupt transfers. [`UsbTransport`]
//! implements it on top of libusb; tests implement it with scripted data.

use std::cell::Cell;
use std::ops::Deref;
use std::time::Duration;

use rusb::{Device, DeviceHandle, GlobalContext};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::protocol::{PRODUCT_ID, VENDOR_ID};

pub type TransportResult<T> = std::result::Result<T, TransportError>;

pub trait Transport {
    fn claim_interface(&self, interface: u8) -> TransportResult<()>;

    fn release_interface(&self, interface: u8) -> TransportResult<()>;

    /// Returns the number of bytes written.
    fn write_interrupt(&self, endpoint: u8, data: &[u8], timeout: Duration)
        -> TransportResult<usize>;

    /// Returns the number of bytes read, which may be zero.
    fn read_interrupt(&self, endpoint: u8, buf: &mut [u8], timeout: Duration)
        -> TransportResult<usize>;
}

/// A claimed interface. Released when dropped, on every exit path.
pub struct InterfaceLock<'a, T: Transport> {
    transport: &'a T,
    interface: u8,
}

impl<'a, T: Transport> InterfaceLock<'a, T> {
    pub fn claim(transport: &'a T, interface: u8) -> TransportResult<Self> {
        transport.claim_interface(interface)?;
        trace!(interface, "claimed interface");
        Ok(Self {
            transport,
            interface,
        })
    }
}

impl<T: Transport> Deref for InterfaceLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: Transport> Drop for InterfaceLock<'_, T> {
    fn drop(&mut self) {
        match self.transport.release_interface(self.interface) {
            Ok(()) => trace!(interface = self.interface, "released interface"),
            Err(e) => warn!(interface = self.interface, "failed to release interface: {}", e),
        }
    }
}

/// An attached pedal, as found on the bus.
pub struct DeviceInfo {
    /// 1-based position in discovery order.
    pub id: usize,
    pub bus: u8,
    pub address: u8,
    device: Device<GlobalContext>,
}

impl DeviceInfo {
    /// All attached devices matching the pedal's vendor and product IDs.
    pub fn discover() -> TransportResult<Vec<DeviceInfo>> {
        let devices = rusb::devices()?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    trace!("skipping device without descriptor: {}", e);
                    continue;
                }
            };
            if desc.vendor_id() != VENDOR_ID || desc.product_id() != PRODUCT_ID {
                continue;
            }

            let info = DeviceInfo {
                id: found.len() + 1,
                bus: device.bus_number(),
                address: device.address(),
                device,
            };
            debug!(id = info.id, bus = info.bus, address = info.address, "found pedal");
            found.push(info);
        }

        Ok(found)
    }

    pub fn open(&self) -> TransportResult<UsbTransport> {
        UsbTransport::open(&self.device)
    }
}

/// The kernel driver and interface calls of an opened device.
trait InterfaceHandle {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()>;
    fn claim_interface(&self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&self, interface: u8) -> rusb::Result<()>;
}

impl InterfaceHandle for DeviceHandle<GlobalContext> {
    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        DeviceHandle::kernel_driver_active(self, interface)
    }

    fn detach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::detach_kernel_driver(self, interface)
    }

    fn attach_kernel_driver(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::attach_kernel_driver(self, interface)
    }

    fn claim_interface(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::claim_interface(self, interface)
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        DeviceHandle::release_interface(self, interface)
    }
}

/// Detach the kernel driver if needed, then claim. The driver is
/// reattached when the claim fails.
fn claim_detached<H: InterfaceHandle>(
    handle: &H,
    detached: &Cell<bool>,
    interface: u8,
) -> TransportResult<()> {
    // Kernel drivers are unsupported on some platforms; treat as inactive.
    if handle.kernel_driver_active(interface).unwrap_or(false) {
        debug!(interface, "detaching kernel driver");
        handle.detach_kernel_driver(interface)?;
        detached.set(true);
    }
    if let Err(e) = handle.claim_interface(interface) {
        reattach(handle, detached, interface);
        return Err(e.into());
    }
    Ok(())
}

fn release_reattached<H: InterfaceHandle>(
    handle: &H,
    detached: &Cell<bool>,
    interface: u8,
) -> TransportResult<()> {
    let result = handle.release_interface(interface);
    reattach(handle, detached, interface);
    result.map_err(TransportError::from)
}

fn reattach<H: InterfaceHandle>(handle: &H, detached: &Cell<bool>, interface: u8) {
    if detached.replace(false) {
        if let Err(e) = handle.attach_kernel_driver(interface) {
            warn!(interface, "failed to reattach kernel driver: {}", e);
        }
    }
}

/// libusb-backed transport for one opened device.
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    detached_kernel_driver: Cell<bool>,
}

impl UsbTransport {
    pub fn open(device: &Device<GlobalContext>) -> TransportResult<Self> {
        let handle = device.open()?;
        Ok(Self {
            handle,
            detached_kernel_driver: Cell::new(false),
        })
    }
}

impl Transport for UsbTransport {
    fn claim_interface(&self, interface: u8) -> TransportResult<()> {
        claim_detached(&self.handle, &self.detached_kernel_driver, interface)
    }

    fn release_interface(&self, interface: u8) -> TransportResult<()> {
        release_reattached(&self.handle, &self.detached_kernel_driver, interface)
    }

    fn write_interrupt(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        debug!("OUT 0x{:02X} {}", endpoint, hex::encode(data));
        self.handle
            .write_interrupt(endpoint, data, timeout)
            .map_err(|e| {
                warn!("interrupt write failed: {}", e);
                TransportError::from(e)
            })
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        let n = self
            .handle
            .read_interrupt(endpoint, buf, timeout)
            .map_err(TransportError::from)?;
        debug!("IN 0x{:02X} {}", endpoint, hex::encode(&buf[..n]));
        Ok(n)
    }
}
