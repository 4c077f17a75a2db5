pub mod clock;
pub mod device;
pub mod envelope;
pub mod registers;
pub mod voice;

pub use device::DeviceController;
pub use envelope::EnvelopeSequencer;
pub use voice::Voice;
