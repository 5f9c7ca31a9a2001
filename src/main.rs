pub fn main() -> std::process::ExitCode {
    rcmark::run()
}
