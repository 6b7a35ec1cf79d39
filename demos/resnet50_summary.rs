use briny_resnet::{tensors::Tensor, ResNetConfig};
use std::error::Error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // optional JSON config as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => ResNetConfig::from_path(path)?,
        None => ResNetConfig::default(),
    };

    let model = config.build()?;
    println!("{}", model.summary());

    // a single grey image through the untrained network
    let mut shape = vec![1];
    shape.extend_from_slice(model.input_shape());
    let batch = Tensor::filled(shape, 0.5f32);
    let probs = model.predict(&batch)?;

    println!("class probabilities: {:?}", probs.data);
    Ok(())
}
