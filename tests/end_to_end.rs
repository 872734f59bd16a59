//! Full predict -> explain -> score runs with in-process members

use image::{Rgb, RgbImage};
use ndarray::{array, Array1, Array4};
use pneumonia_risk_pipeline::analyzer::{Analyzer, AssessmentRequest};
use pneumonia_risk_pipeline::config::AppConfig;
use pneumonia_risk_pipeline::error::PipelineError;
use pneumonia_risk_pipeline::explain::RenderOptions;
use pneumonia_risk_pipeline::models::{Classifier, Ensemble, GapLinearClassifier};
use pneumonia_risk_pipeline::scoring::{
    HistoryInput, HistoryPolicy, RiskScorer, ScoringConfig, Symptom, SymptomCatalog,
};
use pneumonia_risk_pipeline::types::{ImageTensor, NormalizationFamily, Rationale, RiskBand};
use std::sync::Arc;

/// Member that always answers with the same distribution
struct Constant {
    name: String,
    probabilities: Array1<f32>,
}

impl Classifier for Constant {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> NormalizationFamily {
        NormalizationFamily::Caffe
    }

    fn forward(&self, _image: &ImageTensor) -> Result<Array1<f32>, PipelineError> {
        Ok(self.probabilities.clone())
    }
}

fn constant(name: &str, probabilities: Array1<f32>) -> Arc<dyn Classifier> {
    Arc::new(Constant {
        name: name.to_string(),
        probabilities,
    })
}

fn labels() -> Vec<String> {
    vec!["normal".to_string(), "bacterial".to_string(), "viral".to_string()]
}

fn analyzer_with(ensemble: Ensemble, catalog: SymptomCatalog) -> Analyzer {
    Analyzer::new(
        ensemble,
        RiskScorer::new(ScoringConfig::default(), 0).unwrap(),
        Arc::new(catalog),
        HistoryPolicy::default(),
        labels(),
        RenderOptions::default(),
    )
}

fn blank_image() -> ImageTensor {
    ImageTensor::new(Array4::zeros((1, 8, 8, 3)), NormalizationFamily::Caffe)
}

fn request(symptoms: &[&str], history: HistoryInput) -> AssessmentRequest {
    AssessmentRequest {
        source: "chest.png".to_string(),
        image: blank_image(),
        reference: None,
        symptoms: symptoms.iter().map(|s| s.to_string()).collect(),
        history,
    }
}

#[test]
fn test_confident_image_ignores_symptoms() {
    let ensemble = Ensemble::builder()
        .member(constant("resnet50", array![0.02, 0.01, 0.97]), 1.0)
        .build()
        .unwrap();
    let analyzer = analyzer_with(ensemble, SymptomCatalog::builtin());

    for (symptoms, history) in [
        (vec![], HistoryInput::Flag(false)),
        (vec!["cyanosis", "confusion", "chest-pain"], HistoryInput::Flag(true)),
    ] {
        let outcome = analyzer.assess(&request(&symptoms, history)).unwrap();
        let report = outcome.assessment;
        assert!((report.final_score - 98.0).abs() < 1e-4);
        assert_eq!(report.rationale, Rationale::HighConfidenceImage);
        assert_eq!(report.explanation, "high confidence from image alone");
        assert_eq!(report.risk_band, RiskBand::Critical);
    }
}

#[test]
fn test_clear_image_reports_low_risk() {
    let ensemble = Ensemble::builder()
        .member(constant("resnet50", array![0.95, 0.03, 0.02]), 1.0)
        .build()
        .unwrap();
    let analyzer = analyzer_with(ensemble, SymptomCatalog::builtin());

    let outcome = analyzer
        .assess(&request(&["breathing-difficulty", "fever"], HistoryInput::Count(4)))
        .unwrap();
    assert!((outcome.assessment.final_score - 5.0).abs() < 1e-4);
    assert_eq!(outcome.assessment.rationale, Rationale::LowRiskImage);
    assert_eq!(outcome.assessment.risk_band, RiskBand::Low);
}

#[test]
fn test_ambiguous_image_blends_auxiliary_signals() {
    let ensemble = Ensemble::builder()
        .member(constant("resnet50", array![0.5, 0.3, 0.2]), 1.0)
        .build()
        .unwrap();
    let catalog = SymptomCatalog::new(vec![
        Symptom {
            id: "cough".to_string(),
            description: "Persistent cough".to_string(),
            weight: 0.8,
        },
        Symptom {
            id: "fever".to_string(),
            description: "High temperature".to_string(),
            weight: 0.2,
        },
    ])
    .unwrap();
    let analyzer = analyzer_with(ensemble, catalog);

    // symptoms 0.8, history 0.2: 0.5*0.6 + 0.8*0.3 + 0.2*0.1 = 0.56
    let outcome = analyzer
        .assess(&request(&["cough"], HistoryInput::Flag(true)))
        .unwrap();
    let report = outcome.assessment;
    assert!((report.final_score - 56.0).abs() < 1e-4);
    assert_eq!(report.rationale, Rationale::AdjustedWithAuxiliary);
    assert_eq!(
        report.explanation,
        "adjusted using symptoms and history due to unclear image evidence"
    );
    assert!((report.positive_probability - 0.5).abs() < 1e-6);
}

#[test]
fn test_members_without_saliency_still_score() {
    let ensemble = Ensemble::builder()
        .member(constant("vit_tiny", array![0.5, 0.3, 0.2]), 1.0)
        .build()
        .unwrap();
    let analyzer = analyzer_with(ensemble, SymptomCatalog::builtin());

    let outcome = analyzer.assess(&request(&[], HistoryInput::default())).unwrap();
    assert!(!outcome.assessment.saliency.available);
    assert!(outcome.assessment.saliency.diagnostic.is_some());
    assert!(outcome.explanation.rendered.is_none());
}

#[test]
fn test_saliency_failure_does_not_block_scoring() {
    // Advertises a layer name its trace does not know
    let mismatched = GapLinearClassifier::new(
        "resnet50",
        array![[1.0], [0.0], [0.0]],
        array![0.0],
        array![[0.0, 1.0, -1.0]],
        array![0.0, 0.0, 0.0],
    )
    .unwrap();
    struct WrongLayer(GapLinearClassifier);
    impl Classifier for WrongLayer {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn family(&self) -> NormalizationFamily {
            self.0.family()
        }
        fn forward(&self, image: &ImageTensor) -> Result<Array1<f32>, PipelineError> {
            self.0.forward(image)
        }
        fn saliency_layer(&self) -> Option<&str> {
            Some("conv5_block3_out")
        }
    }

    let ensemble = Ensemble::builder()
        .member(Arc::new(WrongLayer(mismatched)), 1.0)
        .build()
        .unwrap();
    let analyzer = analyzer_with(ensemble, SymptomCatalog::builtin());

    let outcome = analyzer.assess(&request(&[], HistoryInput::default())).unwrap();
    assert!(!outcome.assessment.saliency.available);
    assert_eq!(outcome.assessment.saliency.member.as_deref(), Some("resnet50"));
    let diagnostic = outcome.assessment.saliency.diagnostic.unwrap();
    assert!(diagnostic.contains("conv5_block3_out"));
}

#[test]
fn test_member_failure_is_fatal() {
    struct Broken;
    impl Classifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn family(&self) -> NormalizationFamily {
            NormalizationFamily::Caffe
        }
        fn forward(&self, _image: &ImageTensor) -> Result<Array1<f32>, PipelineError> {
            Err(PipelineError::Inference {
                model: "broken".to_string(),
                message: "session closed".to_string(),
            })
        }
    }

    let ensemble = Ensemble::builder()
        .member(constant("resnet50", array![0.5, 0.3, 0.2]), 0.5)
        .member(Arc::new(Broken), 0.5)
        .build()
        .unwrap();
    let analyzer = analyzer_with(ensemble, SymptomCatalog::builtin());

    let err = analyzer.assess(&request(&[], HistoryInput::default())).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_from_config_renders_overlay_at_reference_size() {
    let member = GapLinearClassifier::new(
        "resnet50",
        array![[1.0], [0.0], [0.0]],
        array![0.0],
        array![[-3.0, 2.0, 1.0]],
        array![1.0, 0.0, -1.0],
    )
    .unwrap();
    let ensemble = Ensemble::builder()
        .member(Arc::new(member), 1.0)
        .build()
        .unwrap();
    let analyzer = Analyzer::from_config(&AppConfig::default(), ensemble).unwrap();

    let image = ImageTensor::new(
        Array4::from_shape_fn((1, 6, 6, 3), |(_, y, _, c)| {
            if c == 0 && y < 3 {
                2.0
            } else {
                0.0
            }
        }),
        NormalizationFamily::Caffe,
    );
    let reference = RgbImage::from_pixel(48, 36, Rgb([120, 120, 120]));
    let outcome = analyzer
        .assess(&AssessmentRequest {
            source: "upload".to_string(),
            image,
            reference: Some(reference),
            symptoms: Vec::new(),
            history: HistoryInput::default(),
        })
        .unwrap();

    let overlay = outcome.explanation.rendered.expect("overlay");
    // Legend strip widens the canvas, height is preserved
    assert_eq!(overlay.height(), 36);
    assert!(overlay.width() > 48);
    assert!(outcome.assessment.saliency.available);
    assert_eq!(outcome.assessment.class_probabilities.len(), 3);
}
