mod archiver;
mod cli;
mod commands;
mod env_loader;
mod error;
mod logging;

fn main() {
    let dotenv = env_loader::load_dotenv();

    if let Err(err) = cli::run(dotenv.as_deref()) {
        eprintln!("error: {err:#}");
        let code = match error::find_archive_error(&err) {
            Some(typed) => {
                eprintln!("code: {}", typed.code().as_str());
                typed.code().exit_code()
            }
            None => 1,
        };
        std::process::exit(code);
    }
}
