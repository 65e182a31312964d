//! Low-level filesystem primitives used by the mover, quarantine and duplicate storage.

mod atomic;
mod copy;
pub mod helpers;
mod io_copy;
mod metadata;
pub mod naming;
pub mod space;
mod util;

pub use atomic::{move_back_no_clobber, try_atomic_move};
pub use copy::copy_into_place;
pub use helpers::{describe_io, io_error_with_help};
pub use io_copy::{copy_streaming, copy_streaming_ex, CopyResult, DurabilityMode};
pub use metadata::{apply_stamp, SourceStamp};
pub use naming::{reserve_exact, reserve_unique};
pub use space::{format_bytes, free_space_bytes, required_with_margin};
pub use util::{fsync_dir, is_cross_device, is_temp_name, unique_temp_path, TEMP_PREFIX};
