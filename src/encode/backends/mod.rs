mod stub;
mod thumbnail;

pub use stub::StubEncoder;
pub use thumbnail::ThumbnailEncoder;
