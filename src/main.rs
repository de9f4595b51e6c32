//! In-process self-check for the interop runtime: drives a managed class
//! through its native call table, round trips it across the boundary, and
//! stress-tests the reference-count protocol.

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use parking_lot::Mutex;
use tracing::info;

use interop_rs::{
    ccw_for_object, com_class, com_iid, com_interface, descriptor_of, dynamic, stub, to_hresult,
    BStr, BStrRef, ComPtr, HResult, IBase, IBaseTrait, InteropError, ModuleCache, Value,
};

com_iid!(
    IID_IECHO = [
        0x4be2_91d7,
        0x6c55,
        0x4e0f,
        [0xa5, 0x1b, 0x92, 0x7e, 0x0c, 0x44, 0xd8, 0x23]
    ]
);

com_interface! {
    /// Test surface: one string-marshalling method, one plain counter.
    interface (IEcho, IEchoTrait): (IBase, IBaseTrait) {
        iid: IID_IECHO,
        vtable: IEchoVtbl,

        fn echo(input: &BStr, output: &mut BStrRef) -> HResult;
        fn calls() -> u32;
    }
}

com_class! {
    class EchoServer {
        iface_echo: IEcho;
        @data: EchoState;
    }
}

#[derive(Default)]
struct EchoState {
    calls: AtomicU64,
    last: Mutex<String>,
}

impl IEchoTrait for EchoServer {
    fn echo(&self, input: &BStr, output: &mut BStrRef) -> HResult {
        to_hresult(|| {
            let text = input
                .to_str()
                .map_err(|_| InteropError::Marshal(interop_rs::MarshalError::InvalidUtf8))?;
            self.data.calls.fetch_add(1, Ordering::Relaxed);
            *self.data.last.lock() = text.to_owned();
            *output = BStrRef::new(text);
            Ok(())
        })
    }

    fn calls(&self) -> u32 {
        self.data.calls.load(Ordering::Relaxed) as u32
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Self-check for the interface ABI runtime"
)]
struct Args {
    /// Retain/release pairs per stress thread
    #[arg(long, default_value_t = 10_000)]
    iterations: u64,

    /// Stress threads
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Optional directory to load a native module from
    #[arg(long, value_name = "DIR")]
    module_root: Option<String>,

    /// Module name to load from the module root
    #[arg(long, requires = "module_root")]
    module: Option<String>,

    /// Factory export to resolve in the module
    #[arg(long, default_value = "create_instance", requires = "module")]
    entry_point: String,
}

fn run(args: &Args) -> Result<(), InteropError> {
    let server = EchoServer::alloc(EchoState::default());
    let echo: ComPtr<IEcho> = server.query()?;

    // Calls through the generated call table.
    let input = BStrRef::new("grüße across the boundary\0!");
    let mut reply = BStrRef::null();
    echo.echo(&input, &mut reply).into_result()?;
    assert_eq!(reply.data(), input.data(), "echo payload mismatch");
    assert_eq!(echo.calls(), 1);
    info!(reply = %reply, "call table round trip ok");

    // Round trip: a proxy crossing back must reuse the original pointer
    // without a new stub appearing.
    let stubs_before = stub::stubs_created();
    let managed: Arc<dyn IEchoTrait> = Arc::new(echo.clone());
    let crossed = ccw_for_object::<IEcho>(Some(&managed));
    assert_eq!(crossed.as_raw(), echo.as_raw(), "round trip changed pointer");
    assert_eq!(
        stub::stubs_created(),
        stubs_before,
        "round trip allocated a stub"
    );
    info!("round trip short-circuit ok");

    // Capability probing: an unsupported identifier reports NoInterface and
    // nothing else.
    com_iid!(
        IID_IMISSING = [
            0x0102_0304,
            0x0506,
            0x0708,
            [0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10]
        ]
    );
    com_interface! {
        interface (IMissing, IMissingTrait): (IBase, IBaseTrait) {
            iid: IID_IMISSING,
            vtable: IMissingVtbl,
        }
    }
    assert!(echo.query_or_null::<IMissing>()?.is_none());
    info!("capability probe ok");

    // The dynamic call path, driven purely by metadata.
    let descriptor = descriptor_of::<IEcho>()?;
    assert_eq!(descriptor.slot_of("echo"), Some(3));
    let outcome = unsafe { dynamic::invoke_interface(&echo, "calls", &[])? };
    match outcome.ret {
        Value::U32(n) => assert_eq!(n, 1),
        other => panic!("unexpected dynamic return {other:?}"),
    }
    let outcome =
        unsafe { dynamic::invoke_interface(&echo, "echo", &[Value::Str("dynamic".into())])? };
    match &outcome.outs[..] {
        [Value::Str(s)] => assert_eq!(s, "dynamic"),
        other => panic!("unexpected dynamic outs {other:?}"),
    }
    assert_eq!(echo.calls(), 2);
    info!("dynamic invocation ok");

    // Reference-count stress: N threads, M balanced pairs each, count must
    // return to where it started with no intermediate underflow.
    let baseline = IBaseTrait::retain(&echo);
    std::thread::scope(|scope| {
        for _ in 0..args.threads {
            scope.spawn(|| {
                for _ in 0..args.iterations {
                    let held = echo.clone();
                    drop(held);
                }
            });
        }
    });
    unsafe { IBaseTrait::release(&echo) };
    assert_eq!(IBaseTrait::retain(&echo), baseline, "count drifted under stress");
    unsafe { IBaseTrait::release(&echo) };
    info!(
        threads = args.threads,
        iterations = args.iterations,
        "reference count stress ok"
    );

    // Optionally probe an external native module's factory export.
    if let (Some(root), Some(module)) = (&args.module_root, &args.module) {
        let cache = ModuleCache::new(root);
        let external: ComPtr<IBase> = cache.entry_point(module, &args.entry_point)?;
        info!(module = %module, entry = %args.entry_point, ptr = ?external, "external module ok");
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => {
            info!("all checks passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("self-check failed: {e} ({})", e.hresult());
            ExitCode::FAILURE
        }
    }
}
