pub mod image_edit;
pub mod multimodal;
pub mod video;
pub mod vision;

pub use image_edit::{EditJob, ImageEditBackend};
pub use multimodal::{Modalities, MultimodalBackend};
pub use video::VideoBackend;
pub use vision::StyleAnalyzer;
