fn main() {
    if let Err(err) = opsweep::cli::run() {
        opsweep::ui::eprintln_error(&err);
        std::process::exit(opsweep::exit::exit_code(&err));
    }
}
