//! Host-side pieces shared by the `whistle` and `whistle-bench` binaries:
//! persisted settings, classifier selection and WAV loading.

pub mod backend;
pub mod settings;
pub mod wav;
