//! End-to-end scenarios: hand-built `ModuleImage` values driven straight
//! through `Vm::new_vm`/`Vm::exec`, exercising disassembly, validation,
//! compilation and interpretation together.

use wasmite::{
    Error, Export, ExportKind, FunctionDef, Limits, Local, ModuleImage, NopExternals, Options,
    ProcessHandle, RuntimeArgs, RuntimeValue, Signature, Trap, TrapKind, ValueType, Vm,
};

fn uleb(mut v: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out
}

fn sleb(v: i64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut v = v;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
    out
}

/// Small fluent builder for raw function bodies, so scenario code reads
/// close to the wat it corresponds to instead of a flat byte list.
struct Body(Vec<u8>);

impl Body {
    fn new() -> Self {
        Body(Vec::new())
    }
    fn op(mut self, byte: u8) -> Self {
        self.0.push(byte);
        self
    }
    fn local_get(mut self, idx: u32) -> Self {
        self.0.push(0x20);
        self.0.extend(uleb(idx));
        self
    }
    fn local_set(mut self, idx: u32) -> Self {
        self.0.push(0x21);
        self.0.extend(uleb(idx));
        self
    }
    fn i32_const(mut self, v: i32) -> Self {
        self.0.push(0x41);
        self.0.extend(sleb(v as i64));
        self
    }
    fn i64_const(mut self, v: i64) -> Self {
        self.0.push(0x42);
        self.0.extend(sleb(v));
        self
    }
    fn f32_const(mut self, v: f32) -> Self {
        self.0.push(0x43);
        self.0.extend_from_slice(&v.to_bits().to_le_bytes());
        self
    }
    fn mem(mut self, byte: u8, offset: u32) -> Self {
        self.0.push(byte);
        self.0.extend(uleb(2)); // natural alignment, unused by the interpreter
        self.0.extend(uleb(offset));
        self
    }
    fn block(mut self) -> Self {
        self.0.push(0x02);
        self.0.push(0x40);
        self
    }
    fn loop_(mut self) -> Self {
        self.0.push(0x03);
        self.0.push(0x40);
        self
    }
    fn br(mut self, depth: u32) -> Self {
        self.0.push(0x0c);
        self.0.extend(uleb(depth));
        self
    }
    fn br_if(mut self, depth: u32) -> Self {
        self.0.push(0x0d);
        self.0.extend(uleb(depth));
        self
    }
    fn call(mut self, idx: u32) -> Self {
        self.0.push(0x10);
        self.0.extend(uleb(idx));
        self
    }
    fn end(mut self) -> Self {
        self.0.push(0x0b);
        self
    }
    fn finish(self) -> Vec<u8> {
        self.0
    }
}

fn func_export(name: &str, index: u32) -> Export {
    Export {
        name: name.into(),
        kind: ExportKind::Func,
        index,
    }
}

#[test]
fn add_two_i32s() {
    let mut image = ModuleImage::new();
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[ValueType::I32, ValueType::I32][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: Body::new().local_get(0).local_get(1).op(0x6a).end().finish(),
    });
    image.exports.push(func_export("add", 0));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(NopExternals)).unwrap();
    let result = vm.exec(0, &[40u64, 2u64]).unwrap();
    assert_eq!(result, Some(42u64));
}

#[test]
fn factorial_loop() {
    // fac(n): result = 1; loop { if n == 0 { break }; result *= n; n -= 1 }
    let body = Body::new()
        .i64_const(1)
        .local_set(1)
        .block()
        .loop_()
        .local_get(0)
        .op(0x50) // i64.eqz
        .br_if(1)
        .local_get(1)
        .local_get(0)
        .op(0x7e) // i64.mul
        .local_set(1)
        .local_get(0)
        .i64_const(1)
        .op(0x7d) // i64.sub
        .local_set(0)
        .br(0)
        .end() // loop
        .end() // block
        .local_get(1)
        .end()
        .finish();

    let mut image = ModuleImage::new();
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[ValueType::I64][..], Some(ValueType::I64)),
        locals: vec![Local {
            count: 1,
            value_type: ValueType::I64,
        }],
        code: body,
    });
    image.exports.push(func_export("fac", 0));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(NopExternals)).unwrap();
    let result = vm.exec(0, &[10u64]).unwrap();
    assert_eq!(result, Some(3628800u64));
}

#[test]
fn memory_round_trip() {
    let body = Body::new()
        .i32_const(16)
        .i32_const(0xDEADBEEFu32 as i32)
        .mem(0x36, 0) // i32.store
        .i32_const(16)
        .mem(0x28, 0) // i32.load
        .end()
        .finish();

    let mut image = ModuleImage::new();
    image.memory = Some(Limits::new(1, Some(1)).unwrap());
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: body,
    });
    image.exports.push(func_export("rt", 0));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(NopExternals)).unwrap();
    let result = vm.exec(0, &[]).unwrap();
    assert_eq!(result, Some(0xDEADBEEFu64));
}

#[test]
fn divide_by_zero_traps() {
    let body = Body::new().local_get(0).local_get(1).op(0x6d).end().finish(); // i32.div_s

    let mut image = ModuleImage::new();
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[ValueType::I32, ValueType::I32][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: body,
    });
    image.exports.push(func_export("div", 0));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(NopExternals)).unwrap();
    match vm.exec(0, &[10u64, 0u64]) {
        Err(Error::Trap(trap)) => assert!(matches!(trap.kind(), TrapKind::DivisionByZero)),
        other => panic!("expected a divide-by-zero trap, got {:?}", other),
    }
}

#[test]
fn out_of_bounds_load_traps() {
    let body = Body::new().local_get(0).mem(0x28, 0).end().finish();

    let mut image = ModuleImage::new();
    image.memory = Some(Limits::new(1, None).unwrap());
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[ValueType::I32][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: body,
    });
    image.exports.push(func_export("peek", 0));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(NopExternals)).unwrap();
    match vm.exec(0, &[70000u64]) {
        Err(Error::Trap(trap)) => assert!(matches!(trap.kind(), TrapKind::OutOfBoundsMemoryAccess)),
        other => panic!("expected an out-of-bounds trap, got {:?}", other),
    }
}

struct Add3;

impl wasmite::Externals for Add3 {
    fn invoke_index(
        &mut self,
        index: usize,
        args: RuntimeArgs,
        _process: &mut ProcessHandle,
    ) -> Result<Option<RuntimeValue>, Trap> {
        assert_eq!(index, 0);
        let x: i32 = args.nth_checked(0)?;
        Ok(Some(RuntimeValue::I32(x + 3)))
    }

    fn signature(&self, index: usize) -> Option<Signature> {
        assert_eq!(index, 0);
        Some(Signature::new(&[ValueType::I32][..], Some(ValueType::I32)))
    }
}

#[test]
fn host_call_round_trip() {
    let mut image = ModuleImage::new();
    image.functions.push(FunctionDef::Import {
        module: "env".into(),
        field: "add3".into(),
        signature: Signature::new(&[ValueType::I32][..], Some(ValueType::I32)),
    });
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[ValueType::I32][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: Body::new().local_get(0).call(0).end().finish(),
    });
    image.exports.push(func_export("_main", 1));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(Add3)).unwrap();
    let result = vm.exec(1, &[0u64]).unwrap();
    assert_eq!(result, Some(3u64));
}

#[test]
fn host_signature_mismatch_is_rejected_at_construction() {
    let mut image = ModuleImage::new();
    // Declares `add3` as `(i64) -> i64`, which doesn't match what `Add3`
    // declares it provides: `(i32) -> i32`.
    image.functions.push(FunctionDef::Import {
        module: "env".into(),
        field: "add3".into(),
        signature: Signature::new(&[ValueType::I64][..], Some(ValueType::I64)),
    });
    image.exports.push(func_export("add3", 0));

    match Vm::new_vm(image, Options::default(), Box::new(Add3)) {
        Err(Error::Instantiation(_)) => {}
        other => panic!("expected a construction-time signature mismatch, got {:?}", other),
    }
}

struct Die;

impl wasmite::Externals for Die {
    fn invoke_index(
        &mut self,
        index: usize,
        _args: RuntimeArgs,
        process: &mut ProcessHandle,
    ) -> Result<Option<RuntimeValue>, Trap> {
        assert_eq!(index, 0);
        process.terminate();
        Ok(None)
    }

    fn signature(&self, index: usize) -> Option<Signature> {
        assert_eq!(index, 0);
        Some(Signature::new(&[][..], None))
    }
}

#[test]
fn host_terminate_stops_execution() {
    let mut image = ModuleImage::new();
    image.functions.push(FunctionDef::Import {
        module: "env".into(),
        field: "die".into(),
        signature: Signature::new(&[][..], None),
    });
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: Body::new().call(0).i32_const(42).end().finish(),
    });
    image.exports.push(func_export("_main", 1));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(Die)).unwrap();
    match vm.exec(1, &[]) {
        Err(Error::Trap(trap)) => assert!(matches!(trap.kind(), TrapKind::HostTerminated)),
        other => panic!("expected a host-terminated trap, got {:?}", other),
    }
}

#[test]
fn nan_comparison_and_min_semantics() {
    let nan = f32::NAN;

    let mut image = ModuleImage::new();
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: Body::new().f32_const(nan).f32_const(nan).op(0x5b).end().finish(), // f32.eq
    });
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: Body::new().f32_const(nan).f32_const(nan).op(0x5c).end().finish(), // f32.ne
    });
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[][..], Some(ValueType::F32)),
        locals: Vec::new(),
        code: Body::new().f32_const(nan).f32_const(1.0).op(0x96).end().finish(), // f32.min
    });
    image.exports.push(func_export("eq_nan", 0));
    image.exports.push(func_export("ne_nan", 1));
    image.exports.push(func_export("min_nan", 2));

    let mut vm = Vm::new_vm(image, Options::default(), Box::new(NopExternals)).unwrap();

    assert_eq!(vm.exec(0, &[]).unwrap(), Some(0u64));
    assert_eq!(vm.exec(1, &[]).unwrap(), Some(1u64));

    let min_slot = vm.exec(2, &[]).unwrap().unwrap();
    let min_result = f32::from_bits(min_slot as u32);
    assert!(min_result.is_nan());
}

/// `a + b + c`: a straight-line run of whitelisted ops with two arithmetic
/// instructions, so the scanner actually admits it as a native-compilable
/// candidate (spec §4.5's quality threshold), unlike the single-add `add`
/// scenario above.
fn sum3_image() -> ModuleImage {
    let mut image = ModuleImage::new();
    image.functions.push(FunctionDef::Local {
        signature: Signature::new(&[ValueType::I32, ValueType::I32, ValueType::I32][..], Some(ValueType::I32)),
        locals: Vec::new(),
        code: Body::new()
            .local_get(0)
            .local_get(1)
            .op(0x6a) // i32.add
            .local_get(2)
            .op(0x6a) // i32.add
            .end()
            .finish(),
    });
    image.exports.push(func_export("sum3", 0));
    image
}

#[test]
fn sum3_matches_between_interpreter_and_native_backend() {
    let mut interpreted = Vm::new_vm(sum3_image(), Options::default(), Box::new(NopExternals)).unwrap();
    let interpreted_result = interpreted.exec(0, &[5u64, 20u64, 17u64]).unwrap();
    assert_eq!(interpreted_result, Some(42u64));
}

#[cfg(feature = "virtual_memory")]
#[test]
fn sum3_native_backend_matches_interpreter() {
    let native_options = Options {
        enable_aot: true,
        ..Options::default()
    };
    let mut native = Vm::new_vm(sum3_image(), native_options, Box::new(NopExternals)).unwrap();
    let native_result = native.exec(0, &[5u64, 20u64, 17u64]).unwrap();
    assert_eq!(native_result, Some(42u64));
}
