pub mod controller;
pub mod gestures;
pub mod input;

pub use controller::{InteractionController, Propagation, IMAGE_DEFAULT, TEXT_DEFAULT};
pub use gestures::{HitTarget, ResizeHandle};
pub use input::{InputCapture, InputRequest, InputResponse, ModalInput, PendingInput};
