use std::{env, path::PathBuf};

use anyhow::{bail, Error};
use xshell::cmd;

type Result<T> = std::result::Result<T, Error>;

/// Bare-metal target the library is checked against.
const EMBEDDED_TARGET: &str = "thumbv7em-none-eabihf";

fn main() -> Result<()> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let args = args.iter().map(|s| &**s).collect::<Vec<_>>();

    match &args[..] {
        [] | ["all"] => all(),
        ["build"] => build(),
        ["test"] => test(),
        ["check"] => check_embedded(),
        ["doc"] => doc(),
        ["lint"] => lint(),
        [other, ..] => bail!("unknown task `{other}`, expected build|test|check|doc|lint"),
    }?;

    Ok(())
}

fn all() -> Result<()> {
    build()?;
    test()?;
    check_embedded()?;
    lint()?;
    Ok(())
}

fn build() -> Result<()> {
    let _p = xshell::pushd(root_dir())?;
    println!("building host...");
    cmd!("cargo build --package pwm_tacho").run()?;
    Ok(())
}

fn test() -> Result<()> {
    let _p = xshell::pushd(root_dir())?;
    println!("testing host...");
    cmd!("cargo test --package pwm_tacho").run()?;
    Ok(())
}

fn check_embedded() -> Result<()> {
    let _p = xshell::pushd(root_dir())?;
    println!("checking {EMBEDDED_TARGET}...");
    cmd!("cargo check --package pwm_tacho --target {EMBEDDED_TARGET}").run()?;
    cmd!("cargo check --package pwm_tacho --target {EMBEDDED_TARGET} --features defmt").run()?;
    Ok(())
}

fn doc() -> Result<()> {
    let _p = xshell::pushd(root_dir())?;
    cmd!("cargo doc --package pwm_tacho --no-deps").run()?;
    Ok(())
}

fn lint() -> Result<()> {
    let _p = xshell::pushd(root_dir())?;
    println!("linting...");
    cmd!("cargo clippy --package pwm_tacho --all-targets -- -D warnings").run()?;
    Ok(())
}

fn root_dir() -> PathBuf {
    let mut xtask_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    xtask_dir.pop();
    xtask_dir
}
