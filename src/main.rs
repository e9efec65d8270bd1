fn main() {
    if let Err(err) = segrelay::cli::main() {
        eprintln!("❌ Error: {err}");
        std::process::exit(1);
    }
}
