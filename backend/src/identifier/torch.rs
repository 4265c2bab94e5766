use std::fs;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tch::{CModule, Device, Kind, Tensor};

use super::{Identifier, IdentifierInitError, IdentifierOutput, Prediction};
use crate::config::ModelConfig;
use crate::imaging::PixelBuffer;

const STATUS_INFERENCE_FAILED: i32 = 1;

#[derive(Debug, Clone)]
struct Label {
    localized_name: String,
    scientific_name: String,
}

/// TorchScript classifier. One label per output logit, in logit order.
pub struct TorchIdentifier {
    module: Mutex<CModule>,
    labels: Vec<Label>,
    device: Device,
    input_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl TorchIdentifier {
    pub fn load(config: &ModelConfig) -> Result<Self, IdentifierInitError> {
        let device = Device::cuda_if_available();
        log::info!("Loading model {} on {:?}", config.model_path.display(), device);
        let module = CModule::load_on_device(&config.model_path, device)
            .map_err(|e| IdentifierInitError::Model(e.to_string()))?;
        let labels = load_labels(&config.labels_path)?;
        log::info!("Loaded {} labels", labels.len());

        Ok(Self {
            module: Mutex::new(module),
            labels,
            device,
            input_size: config.input_size,
            mean: config.mean,
            std: config.std,
        })
    }

    fn preprocess(&self, image: &PixelBuffer) -> Tensor {
        let chw = image.to_normalized_chw(self.input_size, self.mean, self.std);
        let data: Vec<f32> = chw.iter().copied().collect();
        let side = self.input_size as i64;
        Tensor::from_slice(&data)
            .view([1, 3, side, side])
            .to_device(self.device)
    }

    fn run(&self, image: &PixelBuffer, top_k: usize) -> Result<Vec<Prediction>, tch::TchError> {
        let input = self.preprocess(image);
        let logits = self
            .module
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .forward_ts(&[input])?;
        let probabilities = logits.softmax(-1, Kind::Float).view([-1]);

        let k = top_k.min(self.labels.len()) as i64;
        let (values, indices) = probabilities.topk(k, -1, true, true);
        let values = Vec::<f32>::try_from(&values.to_device(Device::Cpu))?;
        let indices = Vec::<i64>::try_from(&indices.to_device(Device::Cpu))?;

        Ok(values
            .into_iter()
            .zip(indices)
            .filter_map(|(probability, index)| {
                self.labels.get(index as usize).map(|label| Prediction {
                    localized_name: label.localized_name.clone(),
                    scientific_name: label.scientific_name.clone(),
                    probability,
                })
            })
            .collect())
    }
}

impl Identifier for TorchIdentifier {
    fn identify(&self, image: &PixelBuffer, top_k: usize) -> IdentifierOutput {
        match self.run(image, top_k) {
            Ok(predictions) => IdentifierOutput::success(predictions),
            Err(e) => {
                log::error!("Model inference error: {:?}", e);
                IdentifierOutput::failure(STATUS_INFERENCE_FAILED, format!("Model inference error: {e}"))
            }
        }
    }
}

/// Reads `localized<TAB>scientific` lines; blank lines and `#` comments are skipped.
fn load_labels(path: &Path) -> Result<Vec<Label>, IdentifierInitError> {
    let content = fs::read_to_string(path)?;
    let mut labels = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (localized, scientific) = line.split_once('\t').ok_or_else(|| {
            IdentifierInitError::Labels(format!("line {} has no tab separator", line_no + 1))
        })?;
        labels.push(Label {
            localized_name: localized.trim().to_string(),
            scientific_name: scientific.trim().to_string(),
        });
    }
    if labels.is_empty() {
        return Err(IdentifierInitError::Labels(format!("{} is empty", path.display())));
    }
    Ok(labels)
}
