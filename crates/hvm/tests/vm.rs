use honeyos_hvm::display::BufferSurface;
use honeyos_hvm::{BytesFetcher, FileFetcher, HvmConfig, Vm, VmState, KERNEL_ABORTED};
use std::path::Path;
use std::time::{Duration, Instant};

/// Writes "hello, h" through the push register, swaps, then returns.
const HELLO_KERNEL: &str = r#"(module
  (import "env" "memory" (memory 2 2 shared))
  (data (i32.const 2048) "hello, h")
  (func (export "_textmode_transfer_buffer_addr") (result i32) i32.const 2048)
  (func (export "_textmode_transfer_buffer_size") (result i32) i32.const 8)
  (func (export "_textmode_transfer_push_register_addr") (result i32) i32.const 1024)
  (func (export "_textmode_transfer_swap_register_addr") (result i32) i32.const 1025)
  (func (export "_textmode_transfer_clear_register_addr") (result i32) i32.const 1026)
  (func $raise (param $register i32)
    (i32.atomic.store8 (local.get $register) (i32.const 1))
    (block $taken
      (loop $wait
        (br_if $taken (i32.eqz (i32.atomic.load8_u (local.get $register))))
        (br $wait))))
  (func (export "_start")
    (call $raise (i32.const 1026))
    (call $raise (i32.const 1024))
    (call $raise (i32.const 1025))))"#;

/// Raises push and swap back to back without waiting for the host, then
/// returns.
const UNSYNCED_KERNEL: &str = r#"(module
  (import "env" "memory" (memory 2 2 shared))
  (data (i32.const 2048) "hello, h")
  (func (export "_textmode_transfer_buffer_addr") (result i32) i32.const 2048)
  (func (export "_textmode_transfer_buffer_size") (result i32) i32.const 8)
  (func (export "_textmode_transfer_push_register_addr") (result i32) i32.const 1024)
  (func (export "_textmode_transfer_swap_register_addr") (result i32) i32.const 1025)
  (func (export "_textmode_transfer_clear_register_addr") (result i32) i32.const 1026)
  (func (export "_start")
    (i32.atomic.store8 (i32.const 1024) (i32.const 1))
    (i32.atomic.store8 (i32.const 1025) (i32.const 1))))"#;

fn surface() -> BufferSurface {
    BufferSurface::new(16.0, 160.0)
}

fn run_until(vm: &mut Vm, surface: &mut BufferSurface, done: impl Fn(&Vm, &BufferSurface) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !done(vm, surface) {
        assert!(
            Instant::now() < deadline,
            "timed out in state {:?} with markup {:?}",
            vm.state(),
            surface.markup()
        );
        vm.frame(surface);
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn guest_output_then_abort_is_rendered_in_order() {
    let mut vm = Vm::new(HvmConfig::default()).unwrap();
    let mut surface = surface();

    vm.init(&BytesFetcher::new(HELLO_KERNEL)).unwrap();
    run_until(&mut vm, &mut surface, |vm, _| vm.state() == VmState::Failed);
    vm.render(&mut surface);

    assert_eq!(surface.markup(), format!("hello, h\n{KERNEL_ABORTED}\n"));
    assert!(!vm.is_relay_running());

    let registers = vm.registers().copied().unwrap();
    assert_eq!(registers.buffer_size, 8);
    assert_eq!(registers.push_register, 1024);
}

#[test]
fn abort_notice_stays_visible_after_unsynced_swap() {
    let mut vm = Vm::new(HvmConfig::default()).unwrap();
    let mut surface = surface();

    vm.init(&BytesFetcher::new(UNSYNCED_KERNEL)).unwrap();
    // Let the guest finish so its ready and abort events land in one pump.
    std::thread::sleep(Duration::from_millis(500));

    for _ in 0..50 {
        vm.frame(&mut surface);
    }

    assert_eq!(vm.state(), VmState::Failed);
    assert!(!vm.is_relay_running());
    assert_eq!(surface.markup(), format!("hello, h\n{KERNEL_ABORTED}\n"));
    vm.display().with_text(|text| assert_eq!(text.active(), ""));
}

#[test]
fn demo_kernel_runs_until_terminated() {
    let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/hello.wat");
    let mut vm = Vm::new(HvmConfig::default()).unwrap();
    let mut surface = surface();

    vm.init(&FileFetcher::new(demo)).unwrap();
    run_until(&mut vm, &mut surface, |_, surface| surface.markup().contains("text mode"));

    assert_eq!(vm.state(), VmState::Running);
    assert!(vm.is_relay_running());
    assert_eq!(
        surface.markup(),
        "<span style=\"color:rgb(255,255,85)\">HoneyOS</span> HVM text mode\n"
    );

    vm.terminate();
    assert_eq!(vm.state(), VmState::Terminated);

    // Nothing is reported for a kernel stopped by the host.
    assert!(!vm.frame(&mut surface));
}

#[test]
fn missing_kernel_file_is_reported_in_band() {
    let dir = tempfile::tempdir().unwrap();
    let mut vm = Vm::new(HvmConfig::default()).unwrap();
    let mut surface = surface();

    vm.init(&FileFetcher::new(dir.path().join("kernel.wasm"))).unwrap();
    vm.frame(&mut surface);

    assert_eq!(vm.state(), VmState::Failed);
    assert!(surface.markup().starts_with("Failed to load kernel: failed to read"));
}

#[test]
fn independent_vms_coexist() {
    let mut first = Vm::new(HvmConfig::default()).unwrap();
    let mut second = Vm::new(HvmConfig::default()).unwrap();
    let mut first_surface = surface();
    let mut second_surface = surface();

    first.init(&BytesFetcher::new(HELLO_KERNEL)).unwrap();
    second.init(&BytesFetcher::new(Vec::new())).unwrap();

    run_until(&mut first, &mut first_surface, |vm, _| vm.state() == VmState::Failed);
    second.frame(&mut second_surface);

    assert!(first_surface.markup().starts_with("hello, h"));
    assert!(second_surface.markup().starts_with("Failed to load kernel"));
}
