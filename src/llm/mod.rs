pub mod gemini;
pub mod media;
pub mod openai;
pub mod types;
pub mod weather;

pub use gemini::GeminiClient;
pub use openai::OpenAiImageClient;
pub use weather::OpenWeatherClient;
