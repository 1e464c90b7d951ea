use rustfmvoice::synth::config::SynthConfig;

fn main() {
    tracing_subscriber::fmt::init();

    // optional JSON config path as the only argument
    let config = match std::env::args().nth(1) {
        Some(path) => match SynthConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path, error = %e, "Failed to load config");
                std::process::exit(1);
            }
        },
        None => SynthConfig::default(),
    };

    if let Err(e) = rustfmvoice::runtime::start(config) {
        tracing::error!(error = %e, "Synth stopped with an error");
        std::process::exit(1);
    }
}
