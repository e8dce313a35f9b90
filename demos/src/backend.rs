//! Backend selection for the demo binaries
//!
//! The backend is fixed at compile time: `cuda` wins over `wgpu`, and NdArray
//! is used when neither is enabled. The binaries only run inference, so no
//! autodiff wrapper is applied.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Backend the binaries run on
        pub type SelectedBackend = Cuda;
        /// Device of [`SelectedBackend`]
        pub type SelectedDevice = CudaDevice;

        /// First CUDA device
        pub fn create_device() -> SelectedDevice {
            CudaDevice::default()
        }

        pub const fn get_backend_name() -> &'static str {
            "CUDA (NVIDIA GPU)"
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        /// Backend the binaries run on
        pub type SelectedBackend = Wgpu;
        /// Device of [`SelectedBackend`]
        pub type SelectedDevice = WgpuDevice;

        /// Default adapter picked by wgpu
        pub fn create_device() -> SelectedDevice {
            WgpuDevice::default()
        }

        pub const fn get_backend_name() -> &'static str {
            "WGPU (GPU)"
        }
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        /// Backend the binaries run on
        pub type SelectedBackend = NdArray;
        /// Device of [`SelectedBackend`]
        pub type SelectedDevice = NdArrayDevice;

        pub fn create_device() -> SelectedDevice {
            NdArrayDevice::Cpu
        }

        pub const fn get_backend_name() -> &'static str {
            "NdArray (CPU)"
        }
    }
}

/// Backend name for the startup log, noting kernel fusion on GPU backends.
pub fn backend_summary() -> String {
    if cfg!(all(feature = "fusion", any(feature = "cuda", feature = "wgpu"))) {
        format!("{} with kernel fusion", get_backend_name())
    } else {
        get_backend_name().to_owned()
    }
}
