//! Classifiers and ensemble inference

pub mod classifier;
pub mod combiner;
pub mod ensemble;
pub mod onnx;
pub mod reference;

pub use classifier::{Classifier, LayerTrace};
pub use ensemble::{Ensemble, EnsembleBuilder, EnsemblePrediction, Member, SharedEnsemble};
pub use onnx::{OnnxClassifier, OnnxLoader};
pub use reference::GapLinearClassifier;
