//! brdflow CLI binary
//!
//! All logic lives in the library; `main` only maps the exit code.

fn main() {
    if let Err(code) = brdflow::cli::run() {
        std::process::exit(code.as_i32());
    }
}
