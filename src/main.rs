fn main() {
    if let Err(e) = media_courier::run() {
        eprintln!("media-courier: {}", e);
        std::process::exit(1);
    }
}
