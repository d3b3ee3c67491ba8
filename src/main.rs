use equilibria_rs::Examples::equilibria_examples::equilibria_examples;
use equilibria_rs::Utils::logger::{init_logger, level_from_str};

pub fn main() {
    // RUST_LOG picks the verbosity, "info" if unset
    let level = level_from_str(&std::env::var("RUST_LOG").unwrap_or_default());
    if let Err(e) = init_logger(level, None) {
        eprintln!("could not initialise logging: {}", e);
    }
    let task: usize = 1;
    equilibria_examples(task);
}
