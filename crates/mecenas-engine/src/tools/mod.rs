pub mod generate_image;
pub mod web_search;

pub use generate_image::GenerateImageTool;
pub use web_search::WebSearchTool;
