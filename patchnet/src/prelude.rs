pub use super::data::{
    cost_file_name, create_train_test_set, intensity_file_name, load_labeled_patches,
    load_pair_frame, load_patches, LabeledPatches, PatchVars, COST_VARIABLE, INTENSITY_VARIABLE,
};
pub use super::error::{Error, Result};
pub use super::mat::{MatArray, MatClass, MatFile, MatWriter};
pub use super::metrics::{accuracy_score, argmax_rows, ConfusionMatrix};
pub use super::model::{
    cnn_encoder, load_encoder, load_matcher, save_encoder, Classifier, ClassifierConfig, Encoder,
    EncoderConfig, Matcher,
};
pub use super::nn::{InferBackend, SeedStream, TrainBackend};
pub use super::timer::Stopwatch;
pub use super::train::{evaluate, fit, EarlyStopping, FitConfig, History};
