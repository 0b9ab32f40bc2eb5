use thiserror::Error;

/// Error type for IR construction and in-place CFG mutation.
#[derive(Debug, Error)]
pub enum IrError {
    /// The block handle does not name a live block of the function.
    #[error("unknown block b{0}")]
    UnknownBlock(u32),
    /// The instruction handle does not name a live instruction of the function.
    #[error("unknown instruction %{0}")]
    UnknownInstruction(u32),
    /// An operand names a parameter the function does not have.
    #[error("parameter #{0} is out of range")]
    InvalidParameter(u32),
    /// The builder has not been positioned at a block.
    #[error("builder is not positioned at a block")]
    NoInsertionBlock,
    /// A terminator was required but another instruction kind was supplied.
    #[error("`{0}` is not a terminator")]
    NotATerminator(String),
    /// A phi was required but another instruction kind was supplied.
    #[error("%{0} is not a phi")]
    NotAPhi(u32),
    /// The block has no terminator to insert before or replace.
    #[error("block `{0}` has no terminator")]
    MissingTerminator(String),
    /// An instruction was erased while other instructions still use its result.
    #[error("instruction %{inst} still has {users} use(s)")]
    InstructionInUse { inst: u32, users: usize },
    /// A block split point lies outside the block.
    #[error("cannot split block `{block}` at index {index}")]
    InvalidSplit { block: String, index: usize },
    /// A global symbol lookup failed.
    #[error("unknown global `{0}`")]
    UnknownGlobal(String),
    /// A symbol was declared twice in the same module.
    #[error("duplicate symbol `{0}`")]
    DuplicateSymbol(String),
}

/// Well-formedness violations found by the IR verifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// A block in the layout has no instructions.
    #[error("block `{0}` is empty")]
    EmptyBlock(String),
    /// The last instruction of a block is not a terminator.
    #[error("block `{0}` does not end in a terminator")]
    MissingTerminator(String),
    /// A terminator appears before the end of a block.
    #[error("block `{block}` has a terminator at index {index} before its end")]
    MisplacedTerminator { block: String, index: usize },
    /// A phi appears after a non-phi instruction.
    #[error("block `{block}` has a phi at index {index} after non-phi instructions")]
    MisplacedPhi { block: String, index: usize },
    /// Phi incoming blocks disagree with the block's predecessors.
    #[error("phi %{inst} in block `{block}` does not match the block's predecessors")]
    PhiPredecessorMismatch { block: String, inst: u32 },
    /// An operand names an erased, unplaced, or valueless instruction.
    #[error("instruction %{inst} in block `{block}` uses dead or valueless %{operand}")]
    DanglingOperand {
        block: String,
        inst: u32,
        operand: u32,
    },
    /// An operand names a parameter the function does not have.
    #[error("instruction %{inst} in block `{block}` uses missing parameter #{index}")]
    InvalidParameter {
        block: String,
        inst: u32,
        index: u32,
    },
    /// A terminator targets a block that is erased or not in the layout.
    #[error("block `{block}` branches to dead block b{target}")]
    DanglingTarget { block: String, target: u32 },
    /// Control flow re-enters the entry block.
    #[error("entry block `{0}` has predecessors")]
    EntryHasPredecessors(String),
    /// An instruction is placed in more than one position.
    #[error("instruction %{0} is placed more than once")]
    DuplicatePlacement(u32),
    /// A value is used somewhere its definition does not dominate.
    #[error("definition of %{operand} does not dominate its use by %{inst} in block `{block}`")]
    NotDominated {
        block: String,
        inst: u32,
        operand: u32,
    },
    /// An operand references a global the module does not define.
    #[error("function `{function}` references unknown global #{global}")]
    UnknownGlobal { function: String, global: u32 },
}

/// Errors raised while interpreting IR.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpError {
    /// Called a function that is neither defined in the module nor a host external.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// Argument count does not match the function signature.
    #[error("`{function}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found: usize,
    },
    /// A value had the wrong runtime shape for the operation.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Integer division by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Signed division overflow (`MIN / -1`).
    #[error("signed division overflow")]
    DivisionOverflow,
    /// Shift amount not smaller than the operand width.
    #[error("shift by {amount} exceeds width {width}")]
    ShiftOverflow { amount: u64, width: u32 },
    /// Read of a stack slot that was never stored to.
    #[error("load from uninitialized stack slot")]
    UninitializedSlot,
    /// Memory access outside a valid object.
    #[error("invalid memory access: {0}")]
    InvalidPointer(String),
    /// Store into a constant global.
    #[error("store into constant global `{0}`")]
    StoreToConstant(String),
    /// Execution exceeded the configured step budget.
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
    /// Executed an `unreachable` terminator.
    #[error("reached `unreachable` in `{function}` block `{block}`")]
    Unreachable { function: String, block: String },
    /// Executed an instruction the interpreter does not model.
    #[error("unsupported instruction: {0}")]
    Unsupported(String),
    /// Read of an instruction result that was never computed.
    #[error("value %{0} used before it was computed")]
    UndefinedValue(u32),
    /// Call nesting exceeded the configured depth.
    #[error("call depth of {0} exceeded")]
    CallDepth(usize),
    /// The IR handed to the interpreter is structurally broken.
    #[error("malformed IR: {0}")]
    Malformed(String),
}

/// Error type for metrics computation.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("CFG is empty or malformed")]
    EmptyCfg,
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("IR operation failed: {0}")]
    Ir(#[from] IrError),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configuration or pass list named a pass that does not exist.
    #[error("unknown pass `{0}`")]
    UnknownPass(String),
    /// The same pass was listed twice.
    #[error("pass `{0}` listed more than once")]
    DuplicatePass(String),
    /// The pass order breaks a sequencing requirement.
    #[error("pass `{first}` must run before `{then}`")]
    InvalidOrder { first: String, then: String },
    /// A probability setting outside `[0, 1]`.
    #[error("probability {value} for pass `{pass}` is outside [0, 1]")]
    InvalidProbability { pass: String, value: f64 },
    /// The function was malformed before any pass ran.
    #[error("function `{function}` is malformed on input: {source}")]
    InvalidInput {
        function: String,
        #[source]
        source: VerifyError,
    },
    /// A pass returned an error while rewriting a function.
    #[error("pass `{pass}` failed on `{function}`: {source}")]
    Transform {
        pass: String,
        function: String,
        #[source]
        source: TransformError,
    },
    /// A pass left the function malformed; its changes were discarded.
    #[error("pass `{pass}` broke `{function}`: {source}")]
    InvariantViolation {
        pass: String,
        function: String,
        #[source]
        source: VerifyError,
    },
}

/// Errors that can occur in the command-line front end.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    /// File read/write error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Pipeline construction or execution failed.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    /// The input module failed verification.
    #[error("invalid module: {0}")]
    Verify(#[from] VerifyError),
    /// Interpretation failed.
    #[error("execution error: {0}")]
    Interp(#[from] InterpError),
    /// The requested function does not exist in the module.
    #[error("no function named `{0}`")]
    UnknownFunction(String),
    /// A command-line argument could not be interpreted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
