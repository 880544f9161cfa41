fn main() {
    if let Err(e) = media_library_db_lib::run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
