fn main() {
    if let Err(err) = filtermate_cli::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
