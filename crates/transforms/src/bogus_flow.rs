use crate::config::{PassSettings, BOGUS_CONTROL_FLOW};
use crate::predicate::{emit_condition, emit_filler, PredicateShape};
use crate::{PassContext, Transform};
use rand::Rng;
use tracing::debug;
use veil_core::{
    cfg::{first_non_phi, has_unwind, is_eligible, redirect_terminator, split_block},
    BlockId, Function, InstKind,
};
use veil_utils::errors::TransformError;

/// Wires never-taken sibling blocks into the live graph.
///
/// A selected block `B` is split after its phis. The head keeps the phis and ends in
/// `condbr (k == k), B.body, B.bogus`; `B.body` holds the original instructions and
/// terminator; `B.bogus` runs filler arithmetic and branches to `B.body`.
pub struct BogusControlFlow {
    probability: f64,
    min_block_size: usize,
}

impl BogusControlFlow {
    pub const DEFAULT_PROBABILITY: f64 = 0.5;
    pub const DEFAULT_MIN_BLOCK_SIZE: usize = 3;

    pub fn new(settings: &PassSettings) -> Self {
        Self {
            probability: settings.probability.unwrap_or(Self::DEFAULT_PROBABILITY),
            min_block_size: settings
                .min_block_size
                .unwrap_or(Self::DEFAULT_MIN_BLOCK_SIZE),
        }
    }

    fn inject(
        &self,
        func: &mut Function,
        block: BlockId,
        ctx: &mut PassContext<'_>,
    ) -> Result<BlockId, TransformError> {
        let name = func.block(block)?.name.clone();
        let split_at = first_non_phi(func, block)?;
        let body = split_block(func, block, split_at, &format!("{name}.body"))?;

        let cond = emit_condition(func, block, PredicateShape::Equal, ctx.rng)?;
        let bogus = func.create_block_after(block, format!("{name}.bogus"))?;
        emit_filler(func, bogus, ctx.rng)?;
        func.push_inst(bogus, InstKind::Br { target: body })?;

        redirect_terminator(
            func,
            block,
            InstKind::CondBr {
                cond,
                then_dest: body,
                else_dest: bogus,
            },
        )?;
        Ok(bogus)
    }
}

impl Default for BogusControlFlow {
    fn default() -> Self {
        Self::new(&PassSettings::default())
    }
}

impl Transform for BogusControlFlow {
    fn name(&self) -> &'static str {
        BOGUS_CONTROL_FLOW
    }

    fn apply(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        let entry = func.entry();
        let mut eligible = Vec::new();
        for &block in func.layout() {
            if Some(block) == entry {
                continue;
            }
            if is_eligible(func, block, self.min_block_size) && !has_unwind(func, block) {
                eligible.push(block);
            } else {
                ctx.record_skipped(1);
            }
        }

        let mut injected = 0;
        for block in eligible {
            if !ctx.rng.random_bool(self.probability) {
                continue;
            }
            let bogus = self.inject(func, block, ctx)?;
            debug!(
                function = %func.name,
                block = %func.block_name(block),
                bogus = %func.block_name(bogus),
                "injected bogus block"
            );
            injected += 1;
        }

        ctx.record_transformed(injected);
        Ok(injected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use veil_core::{
        interp::Interpreter, samples, verify::verify_function, GlobalTable, Module, Type,
    };

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    fn run(func: &mut Function, probability: f64, seed: u64) -> crate::PassOutcome {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut globals = GlobalTable::default();
        let mut ctx = PassContext::new(&mut rng, &mut globals);
        let pass = BogusControlFlow {
            probability,
            min_block_size: BogusControlFlow::DEFAULT_MIN_BLOCK_SIZE,
        };
        pass.apply(func, &mut ctx).unwrap();
        ctx.finish()
    }

    fn call(func: Function, name: &str, arg: i64) -> (Option<i64>, Vec<String>) {
        let mut module = Module::new("m");
        module.add_function(func).unwrap();
        let mut interp = Interpreter::new(&module);
        let result = interp.call(name, &[arg]).unwrap();
        let f = module.function(name).unwrap();
        let visited = interp
            .visited_blocks(name)
            .into_iter()
            .map(|b| f.block(b).unwrap().name.clone())
            .collect();
        (result, visited)
    }

    #[tokio::test]
    async fn test_compute_at_full_probability() {
        init_tracing();
        let mut func = samples::compute().unwrap();
        let before = func.block_count();
        let outcome = run(&mut func, 1.0, 42);
        verify_function(&func).unwrap();

        // cond, body and latch qualify; exit has two instructions.
        assert_eq!(outcome.transformed, 3);
        assert_eq!(outcome.skipped, 1);
        assert!(func.block_count() > before);
        assert_eq!(func.block_count(), before + 6);

        let (result, visited) = call(func, "compute", 10);
        assert_eq!(result, Some(90));
        assert!(visited.iter().all(|name| !name.ends_with(".bogus")));
        assert!(visited.iter().any(|name| name == "body.body"));
    }

    #[tokio::test]
    async fn test_phis_stay_in_head() {
        init_tracing();
        let mut func = samples::compute_ssa().unwrap();
        let header = func.layout()[1];
        run(&mut func, 1.0, 7);
        verify_function(&func).unwrap();

        let first = func.block(header).unwrap().insts()[0];
        assert!(func.inst(first).unwrap().kind.is_phi());
        for x in [0, 3, 10] {
            let want = (0..x).map(|i| i * 2).sum::<i64>();
            assert_eq!(call(func.clone(), "compute_ssa", x).0, Some(want));
        }
    }

    #[tokio::test]
    async fn test_landing_pad_blocks_are_skipped() {
        init_tracing();
        let mut f = Function::new("f", vec![Type::I32], Type::I32);
        let entry = f.create_block("entry");
        let pad = f.create_block("pad");
        f.push_inst(entry, InstKind::Br { target: pad }).unwrap();
        f.push_inst(pad, InstKind::LandingPad).unwrap();
        f.push_inst(
            pad,
            InstKind::Binary {
                op: veil_core::BinaryOp::Add,
                lhs: veil_core::Value::Param(0),
                rhs: veil_core::Value::i32(1),
            },
        )
        .unwrap();
        f.push_inst(pad, InstKind::Ret { value: None }).unwrap();

        let outcome = run(&mut f, 1.0, 1);
        assert_eq!(outcome.transformed, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(f.block_count(), 2);
    }

    #[tokio::test]
    async fn test_eligibility_is_idempotent() {
        init_tracing();
        let func = samples::compute().unwrap();
        let pass = BogusControlFlow::default();
        let first: Vec<bool> = func
            .layout()
            .iter()
            .map(|&b| is_eligible(&func, b, pass.min_block_size))
            .collect();
        let second: Vec<bool> = func
            .layout()
            .iter()
            .map(|&b| is_eligible(&func, b, pass.min_block_size))
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![false, true, true, true, false]);
    }
}
