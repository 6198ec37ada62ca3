// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Performance: Zero-cost abstractions, explicit control

pub mod barriers;
pub mod buffer;
pub mod device;
pub mod frames;
pub mod image;
pub mod oneshot;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod timestamps;

pub use device::VulkanDevice;

use anyhow::Result;

/// Finish building an object around a freshly created `handle`. If `build`
/// fails, `release` destroys the handle before the error is returned.
pub fn release_on_error<H: Copy, T>(
    handle: H,
    build: impl FnOnce(H) -> Result<T>,
    release: impl FnOnce(H),
) -> Result<T> {
    let built = build(handle);
    if built.is_err() {
        release(handle);
    }
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_handle_released_when_build_fails() {
        let released = Cell::new(None);
        let result: Result<()> = release_on_error(
            7u64,
            |_| anyhow::bail!("bind failed"),
            |handle| released.set(Some(handle)),
        );
        assert!(result.is_err());
        assert_eq!(released.get(), Some(7));
    }

    #[test]
    fn test_handle_kept_when_build_succeeds() {
        let released = Cell::new(false);
        let result = release_on_error(7u64, |handle| Ok(handle * 2), |_| released.set(true));
        assert_eq!(result.unwrap(), 14);
        assert!(!released.get());
    }
}
