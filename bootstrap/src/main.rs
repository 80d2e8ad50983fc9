fn main() {
    let args: Vec<String> = std::env::args().collect();
    std::process::exit(app_bootstrap::run_cli(args));
}
