pub mod args;
mod embed;
mod fit_intensity;
mod mat_info;
mod patch2png;
mod train_embedding;
mod utils;
