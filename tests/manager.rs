mod common;

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use common::*;
use qvm::asm::Asm;
use qvm::error::*;
use qvm::opcode::Opcode;
use qvm::{
    CallArgs, DirImageSource, Error, FormatVersion, ImageSource, MemoryImageSource, NativeLoader, NativeModule,
    SyscallArgs, SystemCalls, VmConfig, VmContext, VmKind, VmManager, VmState,
};

/// vmMain(command, v):
///   0 -> system call 1(v)
///   1 -> stores v at 0x100, returns `tag`
///   2 -> value at 0x100
///   3 -> faults
fn module(tag: i32, bss: u32) -> Vec<u8> {
    let mut asm = Asm::new();
    let (store, read, broken) = (asm.label(), asm.label(), asm.label());
    asm.enter(FRAME);
    asm.param(FRAME, 0).konst(1).op_label(Opcode::Eq, store);
    asm.param(FRAME, 0).konst(2).op_label(Opcode::Eq, read);
    asm.param(FRAME, 0).konst(3).op_label(Opcode::Eq, broken);
    asm.param(FRAME, 1).arg(8).syscall(1).leave(FRAME);
    asm.place(store).konst(0x100).param(FRAME, 1).op(Opcode::Store4).konst(tag).leave(FRAME);
    asm.place(read).konst(0x100).op(Opcode::Load4).leave(FRAME);
    asm.place(broken).op(Opcode::Undef);
    qvm::asm::ImageBuilder::new(FormatVersion::Extended, asm.finish().unwrap()).bss(bss).build()
}

fn game() -> Vec<u8> { module(1, BSS) }

/// Image source the test can change after handing it to a manager.
#[derive(Clone, Default)]
struct Shared(Rc<RefCell<MemoryImageSource>>);

impl Shared {
    fn with(name: &str, bytes: Vec<u8>) -> Self {
        let s = Self::default();
        s.0.borrow_mut().insert(name, bytes);
        s
    }

    fn replace(&self, name: &str, bytes: Vec<u8>) {
        let mut src = self.0.borrow_mut();
        src.remove(name);
        src.insert(name, bytes);
    }
}

impl ImageSource for Shared {
    fn images(&self, name: &str) -> Vec<Vec<u8>> { self.0.borrow().images(name) }
    fn symbol_map(&self, name: &str) -> Option<String> { self.0.borrow().symbol_map(name) }
}

/// Native `ui`: 0 -> 3v, 1 -> system call 1(v), 2 -> re-enters with 0(v + 1).
struct Tripler;

impl NativeModule for Tripler {
    fn vm_main(&self, host: &mut dyn SystemCalls, vm: &mut VmContext<'_>, args: &CallArgs) -> Result<i32, Error> {
        match args.command() {
            0 => Ok(args.arg(0) * 3),
            1 => host.system_call(vm, &SyscallArgs::new(1, &[args.arg(0)])),
            2 => vm.call(host, 0, &[args.arg(0) + 1]),
            _ => Ok(-1),
        }
    }
}

#[derive(Clone)]
struct Natives {
    available: Rc<Cell<bool>>,
    loads: Rc<Cell<u32>>,
}

impl Natives {
    fn new() -> Self { Self { available: Rc::new(Cell::new(true)), loads: Rc::new(Cell::new(0)) } }
}

impl NativeLoader for Natives {
    fn load(&self, name: &str) -> Option<Rc<dyn NativeModule>> {
        if name != "ui" || !self.available.get() { return None; }
        self.loads.set(self.loads.get() + 1);
        Some(Rc::new(Tripler))
    }
}

fn native_config() -> VmConfig {
    let mut config = VmConfig::default();
    config.modules.insert("ui".to_string(), VmKind::Native);
    config.modules.insert("cgame".to_string(), VmKind::Native);
    config
}

#[test]
fn create_loads_once_per_name() {
    let mut manager = VmManager::new(VmConfig::default(), Shared::with("game", game()));
    let a = manager.create("game").unwrap();
    let b = manager.create("game").unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert_eq!(manager.len(), 1);
    assert_eq!(a.borrow().kind(), VmKind::Compiled);
    assert_eq!(manager.call("game", &mut doubling_host(), 0, &[21]), Ok(42));
}

#[test]
fn create_respects_the_instance_limit() {
    let mut source = MemoryImageSource::new();
    source.insert("a", game()).insert("b", game()).insert("c", game());
    let config = VmConfig { max_instances: 2, ..Default::default() };
    let mut manager = VmManager::new(config, source);
    manager.create("a").unwrap();
    manager.create("b").unwrap();
    assert_eq!(manager.create("c").unwrap_err(), Error::Load(TOO_MANY_VMS));
    assert!(manager.create("a").is_ok());

    manager.unload("a").unwrap();
    assert!(manager.create("c").is_ok());
}

#[test]
fn create_falls_back_to_the_next_image() {
    let mut broken = game();
    broken[0] = 0;
    let mut source = MemoryImageSource::new();
    source.insert("game", broken.clone()).insert("game", game());
    source.insert("bad", broken.clone()).insert("bad", game()[..10].to_vec());
    let mut manager = VmManager::new(VmConfig::default(), source);

    manager.create("game").unwrap();
    assert_eq!(manager.call("game", &mut no_host(), 1, &[5]), Ok(1));
    assert_eq!(manager.create("bad").unwrap_err(), Error::Load(IMAGE_TRUNCATED));
    assert_eq!(manager.create("missing").unwrap_err(), Error::Load(MODULE_NOT_FOUND));
    assert_eq!(manager.len(), 1);
}

#[test]
fn config_picks_the_strategy() {
    let config = VmConfig::from_json(r#"{ "default_kind": "interpreted", "modules": { "fast": "compiled" } }"#).unwrap();
    let mut source = MemoryImageSource::new();
    source.insert("game", game()).insert("fast", game());
    let mut manager = VmManager::new(config, source);
    assert_eq!(manager.create("game").unwrap().borrow().kind(), VmKind::Interpreted);
    assert_eq!(manager.create("fast").unwrap().borrow().kind(), VmKind::Compiled);
}

#[test]
fn native_modules_bypass_bytecode() {
    let natives = Natives::new();
    let mut manager = VmManager::with_natives(native_config(), Shared::with("ui", game()), natives.clone());
    let ui = manager.create("ui").unwrap();
    assert_eq!(ui.borrow().kind(), VmKind::Native);
    assert!(ui.borrow().as_bytecode().is_none());
    assert_eq!(natives.loads.get(), 1);

    assert_eq!(manager.call("ui", &mut no_host(), 0, &[4]), Ok(12));
    assert_eq!(manager.call("ui", &mut no_host(), 2, &[4]), Ok(15));

    let mut host = |vm: &mut VmContext<'_>, args: &SyscallArgs| -> Result<i32, Error> {
        assert!(vm.memory().is_none());
        assert_eq!(vm.name(), "ui");
        assert_eq!(vm.call_level(), 1);
        Ok(args.int(1) + 100)
    };
    assert_eq!(manager.call("ui", &mut host, 1, &[1]), Ok(101));

    let info = ui.borrow().info();
    assert_eq!(info.kind, VmKind::Native);
    assert_eq!(info.to_string(), "ui : native (ready)\n");
}

#[test]
fn missing_native_modules_load_as_bytecode() {
    let mut manager = VmManager::with_natives(native_config(), Shared::with("cgame", game()), Natives::new());
    let cgame = manager.create("cgame").unwrap();
    assert_eq!(cgame.borrow().kind(), VmKind::Compiled);
    assert_eq!(manager.call("cgame", &mut doubling_host(), 0, &[8]), Ok(16));
}

#[test]
fn restarting_a_native_module_rebuilds_it() {
    let natives = Natives::new();
    let mut manager = VmManager::with_natives(native_config(), MemoryImageSource::new(), natives.clone());
    let ui = manager.create("ui").unwrap();
    manager.restart("ui").unwrap();
    assert_eq!(natives.loads.get(), 2);
    assert!(Rc::ptr_eq(&ui, &manager.get("ui").unwrap()));
    assert_eq!(manager.call("ui", &mut no_host(), 0, &[2]), Ok(6));

    natives.available.set(false);
    assert_eq!(manager.restart("ui"), Err(Error::ReloadMismatch(RESTART_FAILED)));
}

#[test]
fn restarting_bytecode_reloads_in_place() {
    let source = Shared::with("game", game());
    let mut manager = VmManager::new(VmConfig::default(), source.clone());
    let handle = manager.create("game").unwrap();
    assert_eq!(manager.call("game", &mut no_host(), 1, &[99]), Ok(1));
    assert_eq!(manager.call("game", &mut no_host(), 2, &[]), Ok(99));

    manager.restart("game").unwrap();
    assert!(Rc::ptr_eq(&handle, &manager.get("game").unwrap()));
    assert_eq!(manager.call("game", &mut no_host(), 2, &[]), Ok(0));

    source.replace("game", module(2, BSS));
    manager.restart("game").unwrap();
    assert_eq!(manager.call("game", &mut no_host(), 1, &[1]), Ok(2));

    source.replace("game", module(3, 0x8000));
    assert_eq!(manager.restart("game"), Err(Error::ReloadMismatch(DATA_SIZE_MISMATCH)));
    assert_eq!(manager.call("game", &mut no_host(), 1, &[1]), Ok(2));

    source.replace("game", vec![1, 2, 3]);
    assert_eq!(manager.restart("game"), Err(Error::Load(IMAGE_TRUNCATED)));
    assert_eq!(manager.restart("nothing"), Err(Error::Unavailable(UNKNOWN_VM)));
}

#[test]
fn restarting_clears_a_fault() {
    let mut manager = VmManager::new(VmConfig::default(), Shared::with("game", game()));
    let handle = manager.create("game").unwrap();
    assert_eq!(fault_message(manager.call("game", &mut no_host(), 3, &[])), BAD_INSTRUCTION);
    assert_eq!(handle.borrow().info().state, VmState::Faulted);
    assert_eq!(manager.call("game", &mut no_host(), 2, &[]), Err(Error::Unavailable(INSTANCE_FAULTED)));

    manager.restart("game").unwrap();
    assert_eq!(manager.call("game", &mut no_host(), 2, &[]), Ok(0));
}

/// Host that pokes at the manager while a call into `game` is running.
struct Meddler<'a> {
    manager: &'a mut VmManager,
    seen: Vec<Error>,
}

impl SystemCalls for Meddler<'_> {
    fn system_call(&mut self, _: &mut VmContext<'_>, _: &SyscallArgs) -> Result<i32, Error> {
        assert_eq!(self.manager.current().as_deref(), Some("game"));
        assert!(self.manager.report().contains("game : busy"));
        assert!(self.manager.info().is_empty());
        if let Err(e) = self.manager.restart("game") { self.seen.push(e); }
        if let Err(e) = self.manager.unload("game") { self.seen.push(e); }
        if let Err(e) = self.manager.call("game", &mut no_host(), 2, &[]) { self.seen.push(e); }
        Ok(7)
    }
}

#[test]
fn busy_modules_cannot_be_restarted_or_unloaded() {
    let mut manager = VmManager::new(VmConfig::default(), Shared::with("game", game()));
    let handle = manager.create("game").unwrap();

    let mut host = Meddler { manager: &mut manager, seen: Vec::new() };
    assert_eq!(handle.borrow_mut().call(&mut host, 0, &[]), Ok(7));
    assert_eq!(host.seen, vec![Error::Unavailable(INSTANCE_BUSY); 3]);

    assert_eq!(manager.len(), 1);
    assert_eq!(manager.current(), None);
    assert_eq!(manager.last().as_deref(), Some("game"));
}

#[test]
fn unload_releases_the_module() {
    let mut manager = VmManager::new(VmConfig::default(), Shared::with("game", game()));
    let handle = manager.create("game").unwrap();
    manager.call("game", &mut no_host(), 2, &[]).unwrap();
    assert_eq!(manager.last().as_deref(), Some("game"));

    manager.unload("game").unwrap();
    assert!(manager.get("game").is_none());
    assert!(manager.is_empty());
    assert_eq!(manager.last(), None);
    assert_eq!(handle.borrow().info().state, VmState::Unloaded);
    assert_eq!(handle.borrow_mut().call(&mut no_host(), 2, &[]), Err(Error::Unavailable(INSTANCE_UNLOADED)));
    assert_eq!(manager.call("game", &mut no_host(), 2, &[]), Err(Error::Unavailable(UNKNOWN_VM)));
    assert_eq!(manager.unload("game"), Err(Error::Unavailable(UNKNOWN_VM)));
}

#[test]
fn clear_unloads_everything() {
    let mut source = MemoryImageSource::new();
    source.insert("a", game()).insert("b", game());
    let mut manager = VmManager::new(VmConfig::default(), source);
    manager.create("a").unwrap();
    manager.create("b").unwrap();
    manager.clear();
    assert!(manager.is_empty());
}

#[test]
fn report_lists_every_module() {
    let mut source = MemoryImageSource::new();
    source.insert("game", game());
    let config = VmConfig { default_kind: VmKind::Interpreted, ..Default::default() };
    let mut manager = VmManager::with_natives(
        VmConfig { modules: native_config().modules, ..config },
        source,
        Natives::new(),
    );
    manager.create("game").unwrap();
    manager.create("ui").unwrap();

    let info = manager.info();
    assert_eq!(info.len(), 2);
    assert_eq!(info[0].name, "game");
    assert_eq!(info[0].kind, VmKind::Interpreted);
    assert_eq!(info[0].data_length, 0x1000);
    assert!(info[0].code_length > 0);

    let report = manager.report();
    assert!(report.starts_with("Registered virtual machines:\n"));
    assert!(report.contains("game : interpreted (ready)\n"));
    assert!(report.contains("    data length :    4096"));
    assert!(report.contains("ui : native (ready)"));
    assert_eq!(info[1].kind, VmKind::Native);
    assert_eq!(info[1].to_string(), "ui : native (ready)\n");
    assert_eq!(report.matches("code length").count(), 1);
}

#[test]
fn symbols_load_when_debugging() {
    let mut source = MemoryImageSource::new();
    source.insert("game", game()).insert_map("game", "0 0 vmMain");
    let config = VmConfig { debug_level: 1, ..Default::default() };
    let mut manager = VmManager::new(config, source.clone());
    manager.create("game").unwrap();
    match manager.call("game", &mut no_host(), 3, &[]) {
        Err(Error::Fault(f)) => assert!(f.symbol.unwrap().starts_with("vmMain+")),
        other => panic!("expected fault, got {other:?}"),
    }

    let mut quiet = VmManager::new(VmConfig::default(), source);
    let handle = quiet.create("game").unwrap();
    assert!(handle.borrow().as_bytecode().unwrap().symbols().is_none());
}

#[test]
fn config_parsing() {
    let config = VmConfig::from_json(r#"{ "modules": { "ui": "native" }, "profile": true }"#).unwrap();
    assert_eq!(config.default_kind, VmKind::Compiled);
    assert_eq!(config.kind_for("ui"), VmKind::Native);
    assert_eq!(config.kind_for("game"), VmKind::Compiled);
    assert_eq!(config.max_instances, 3);
    assert!(config.wants_symbols());
    assert!(!VmConfig::default().wants_symbols());

    assert!(matches!(VmConfig::from_json(r#"{ "default_kind": "jit" }"#), Err(Error::Config(_))));
    assert!(matches!(VmConfig::from_file(&PathBuf::from("/nonexistent/vm.json")), Err(Error::Config(_))));
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("qvm-{tag}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(dir.join("vm")).unwrap();
    dir
}

#[test]
fn directory_source_searches_roots_in_order() {
    let (first, second) = (scratch_dir("first"), scratch_dir("second"));
    fs::write(first.join("vm/game.qvm"), b"not a module").unwrap();
    fs::write(second.join("vm/game.qvm"), game()).unwrap();
    fs::write(second.join("vm/game.map"), "0 0 vmMain\n").unwrap();

    let source = DirImageSource::new([&first, &second]);
    assert_eq!(source.images("game").len(), 2);
    assert!(source.images("other").is_empty());
    assert_eq!(source.symbol_map("game").as_deref(), Some("0 0 vmMain\n"));

    let config_path = first.join("vm.json");
    fs::write(&config_path, r#"{ "debug_level": 2 }"#).unwrap();
    let config = VmConfig::from_file(&config_path).unwrap();

    let mut manager = VmManager::new(config, source);
    let handle = manager.create("game").unwrap();
    assert_eq!(handle.borrow().as_bytecode().unwrap().symbols().map(|s| s.len()), Some(1));
    assert_eq!(manager.call("game", &mut doubling_host(), 0, &[3]), Ok(6));

    let _ = fs::remove_dir_all(first);
    let _ = fs::remove_dir_all(second);
}
