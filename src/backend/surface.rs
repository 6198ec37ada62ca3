// Surface - platform window connection
//
// Vulkan talks to the OS window through a VkSurfaceKHR. Which extension
// creates it depends on the window system behind the raw handles.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;

/// Instance extensions needed to present to windows of this display
pub fn required_extensions(display_handle: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display_handle {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };

    Ok(vec![khr::Surface::name(), platform])
}

/// Create a surface for the given window.
///
/// # Safety
/// The handles must stay valid for the lifetime of the returned surface,
/// and `instance` must have been created with `required_extensions`.
pub unsafe fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = match (display_handle, window_handle) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as vk::HINSTANCE;
            let hwnd = handle.hwnd.get() as vk::HWND;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }

        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .context("Xlib display handle has no display")?
                .as_ptr();
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut _)
                .window(window.window as vk::Window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }

        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display
                .connection
                .context("Xcb display handle has no connection")?
                .as_ptr();
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection as *mut _)
                .window(window.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }

        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut _)
                .surface(window.surface.as_ptr() as *mut _);
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }

        _ => anyhow::bail!("Unsupported window handle type"),
    };

    surface.context("Failed to create window surface")
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, WindowsDisplayHandle};
    use std::ptr::NonNull;

    #[test]
    fn test_extensions_include_generic_surface() {
        let windows = required_extensions(RawDisplayHandle::Windows(WindowsDisplayHandle::new())).unwrap();
        assert_eq!(windows, vec![khr::Surface::name(), khr::Win32Surface::name()]);
    }

    #[test]
    fn test_wayland_extensions() {
        let mut dummy = 0u8;
        let display = NonNull::from(&mut dummy).cast();
        let handle = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display));
        let extensions = required_extensions(handle).unwrap();
        assert!(extensions.contains(&khr::WaylandSurface::name()));
        assert!(!extensions.contains(&khr::XlibSurface::name()));
    }
}
