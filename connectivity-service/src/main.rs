fn main() {
    if let Err(e) = connectivity_service::run() {
        eprintln!("connectivity-service: {e:#}");
        std::process::exit(1);
    }
}
