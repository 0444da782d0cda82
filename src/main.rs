use std::fs;
use std::process::ExitCode;

use clap::Parser;

use archive::cli::{self, Action, Opt, RunArgs};
use archive::error::{self, exit_code_for};
use archive::interfaces;
use archive::paramlist::{self, ParamList};
use archive::pointer::{Pointer, PointerFlags};
use archive::program::Program;
use archive::registry::{self, Executor, InterfaceKey, Registry};

fn main() -> ExitCode {
    env_logger::init();

    let opt = Opt::parse();
    let (args, dry_run) = match opt.action {
        Action::Run(args) => (args, false),
        Action::Validate(args) => (args, true),
    };

    match run(args, dry_run) {
        Ok(code) => ExitCode::from(code as u8),
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(exit_code_for(error::Status::Err(error::EngineError::Failure)) as u8)
        }
    }
}

fn run(args: RunArgs, dry_run: bool) -> Result<i32, String> {
    let text = fs::read_to_string(&args.file)
        .map_err(|err| format!("could not read {:?}: {err}", args.file))?;
    let program = Program::from_json(&text)
        .map_err(|err| format!("could not parse {:?} as a program: {err}", args.file))?;

    let capacity = args.capacity.unwrap_or(program.registry_capacity);
    let registry = Registry::new(capacity).map_err(|err| format!("could not start registry: {err}"))?;
    registry.register_interface("signal_management", interfaces::signal_management::interface());
    registry.register_interface("thread_group", interfaces::thread_group::interface());
    registry.register_interface("library", interfaces::library::interface());
    registry.register_interface("memory", interfaces::memory::interface());

    let mut executor = Executor::new(&registry);
    executor.dry_run = dry_run;

    if !args.watch_signal.is_empty() {
        let mut params: ParamList = None;
        for name in &args.watch_signal {
            let Some(signo) = cli::signal_number(name) else {
                return Err(format!("unrecognized signal name {name:?}"));
            };
            params = paramlist::store_push(params, "signal", Pointer::boxed(signo, PointerFlags::empty()));
        }
        let status = executor.execute(&registry::Instruction::Init {
            key: "signals".to_string(),
            interface_key: InterfaceKey::Named("signal_management"),
            dparams_key: None,
            params,
        });
        if status.is_err() {
            return Err(format!("could not install signal watch: {status:?}"));
        }
        log::info!("watching {} signal(s)", args.watch_signal.len());
    }

    let mut last_status = error::Status::Ok;
    for instr in program.instructions() {
        last_status = executor.execute(&instr);
        if last_status.is_err() {
            log::error!("instruction failed: {last_status:?}");
            break;
        }
        log::debug!("instruction ok: {last_status:?}");
    }

    if let Some(entry_key) = &program.entry_state {
        if !dry_run && !last_status.is_err() {
            if registry.resolve(entry_key).is_none() {
                return Err(format!("entry_state key {entry_key:?} was never initialized"));
            }
            log::info!("entry state {entry_key:?} is ready");
        }
    }

    Ok(exit_code_for(last_status))
}
