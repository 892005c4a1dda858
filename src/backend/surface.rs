// Surface - window connection
//
// Maps raw-window-handle 0.6 handles onto the matching VK_KHR_*_surface
// extension. Win32, Xlib and Wayland are supported.

use anyhow::{Context, Result};
use ash::extensions::khr::{Surface, WaylandSurface, Win32Surface, XlibSurface};
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;

/// Instance extensions required to present to the given display
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => XlibSurface::name(),
        RawDisplayHandle::Wayland(_) => WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };

    Ok(vec![Surface::name(), platform])
}

/// Create a presentation surface for a window
///
/// # Safety
/// The handles must stay valid for the lifetime of the returned surface.
pub unsafe fn create_surface(
    entry: &Entry,
    instance: &Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            Win32Surface::new(entry, instance)
                .create_win32_surface(&create_info, None)
                .context("Failed to create Win32 surface")
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .context("Xlib display handle has no display pointer")?
                .as_ptr();
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(handle.window as vk::Window);
            XlibSurface::new(entry, instance)
                .create_xlib_surface(&create_info, None)
                .context("Failed to create Xlib surface")
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(handle.surface.as_ptr());
            WaylandSurface::new(entry, instance)
                .create_wayland_surface(&create_info, None)
                .context("Failed to create Wayland surface")
        }
        _ => anyhow::bail!("Unsupported window handle type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, XlibDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn xlib_needs_surface_and_xlib_extensions() {
        let display = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let extensions = required_extensions(display).unwrap();
        assert_eq!(extensions, vec![Surface::name(), XlibSurface::name()]);
    }

    #[test]
    fn wayland_needs_surface_and_wayland_extensions() {
        let mut dummy = 0u8;
        let ptr = NonNull::from(&mut dummy).cast();
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(ptr));
        let extensions = required_extensions(display).unwrap();
        assert_eq!(extensions[1], WaylandSurface::name());
    }
}
