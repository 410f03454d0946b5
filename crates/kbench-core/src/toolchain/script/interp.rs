//! Tensor evaluation of checked `kbs` programs.

use std::collections::HashMap;

use super::parser::{BinOp, Expr, Func, Program};
use crate::domain::tensor::bounded_numel;
use crate::domain::Tensor;
use crate::toolchain::ExecError;

/// Named values visible to the forward body.
pub type Bindings = HashMap<String, Tensor>;

/// Run the forward body of `program`.
///
/// `state` holds init scalars and parameters; `inputs` are bound to the
/// forward parameters in order.
pub fn run_forward(
    program: &Program,
    state: &Bindings,
    inputs: &[Tensor],
) -> Result<Vec<Tensor>, ExecError> {
    let fwd = &program.forward;
    if inputs.len() != fwd.params.len() {
        return Err(ExecError::Arity {
            expected: fwd.params.len(),
            actual: inputs.len(),
        });
    }

    let mut locals: Bindings = fwd
        .params
        .iter()
        .cloned()
        .zip(inputs.iter().cloned())
        .collect();
    for stmt in &fwd.body {
        let value = eval(&stmt.expr, state, &locals)?;
        locals.insert(stmt.name.clone(), value);
    }
    Ok(vec![eval(&fwd.ret, state, &locals)?])
}

fn lookup<'a>(name: &str, state: &'a Bindings, locals: &'a Bindings) -> Result<&'a Tensor, ExecError> {
    locals
        .get(name)
        .or_else(|| state.get(name))
        .ok_or_else(|| ExecError::Worker(format!("unbound name `{name}`")))
}

fn eval(expr: &Expr, state: &Bindings, locals: &Bindings) -> Result<Tensor, ExecError> {
    match expr {
        Expr::Num(v) => Ok(Tensor::scalar(*v)),
        Expr::Var(name) => lookup(name, state, locals).cloned(),
        Expr::Binary { op, lhs, rhs } => {
            let a = eval(lhs, state, locals)?;
            let b = eval(rhs, state, locals)?;
            binary(*op, &a, &b)
        }
        Expr::Call { func, args } => {
            let values = args
                .iter()
                .map(|arg| eval(arg, state, locals))
                .collect::<Result<Vec<_>, _>>()?;
            call(*func, &values)
        }
    }
}

/// Elementwise binary op; a 0-d operand broadcasts against any shape.
pub fn binary(op: BinOp, a: &Tensor, b: &Tensor) -> Result<Tensor, ExecError> {
    if a.shape() == b.shape() {
        let data = a
            .data()
            .iter()
            .zip(b.data())
            .map(|(&x, &y)| op.apply(x, y))
            .collect();
        return shaped(a.shape(), data);
    }
    if b.is_scalar() {
        let y = b.data()[0];
        return Ok(a.map(|x| op.apply(x, y)));
    }
    if a.is_scalar() {
        let x = a.data()[0];
        return Ok(b.map(|y| op.apply(x, y)));
    }
    Err(ExecError::Shape(format!(
        "cannot apply `{}` to shapes {:?} and {:?}",
        op.symbol(),
        a.shape(),
        b.shape()
    )))
}

fn call(func: Func, args: &[Tensor]) -> Result<Tensor, ExecError> {
    match (func, args) {
        (Func::Matmul, [a, b]) => matmul(a, b),
        (Func::Sum, [t]) => Ok(Tensor::scalar(t.data().iter().sum())),
        (Func::Mean, [t]) => {
            let n = t.numel().max(1) as f32;
            Ok(Tensor::scalar(t.data().iter().sum::<f32>() / n))
        }
        (Func::Max, [t]) => Ok(Tensor::scalar(
            t.data().iter().copied().fold(f32::NEG_INFINITY, f32::max),
        )),
        (Func::Min, [t]) => Ok(Tensor::scalar(
            t.data().iter().copied().fold(f32::INFINITY, f32::min),
        )),
        (func, [t]) => match func.elementwise() {
            Some(f) => Ok(t.map(f)),
            None => Err(ExecError::Worker(format!("`{func}` is not elementwise"))),
        },
        (func, args) => Err(ExecError::Worker(format!(
            "`{func}` called with {} argument(s)",
            args.len()
        ))),
    }
}

fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor, ExecError> {
    let (m, k, n) = match (a.shape(), b.shape()) {
        ([m, k], [k2, n]) if k == k2 => (*m, *k, *n),
        (sa, sb) => {
            return Err(ExecError::Shape(format!(
                "matmul needs [m, k] x [k, n], got {sa:?} and {sb:?}"
            )))
        }
    };
    let size = bounded_numel(&[m, n])?;
    let (ad, bd) = (a.data(), b.data());
    let mut out = vec![0.0f32; size];
    for i in 0..m {
        for p in 0..k {
            let x = ad[i * k + p];
            for j in 0..n {
                out[i * n + j] += x * bd[p * n + j];
            }
        }
    }
    shaped(&[m, n], out)
}

fn shaped(shape: &[usize], data: Vec<f32>) -> Result<Tensor, ExecError> {
    Tensor::new(shape.to_vec(), data).map_err(|e| ExecError::Shape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::script::parser::parse_program;

    fn t(shape: &[usize], data: &[f32]) -> Tensor {
        Tensor::new(shape.to_vec(), data.to_vec()).unwrap()
    }

    fn run(src: &str, inputs: &[Tensor]) -> Result<Vec<Tensor>, ExecError> {
        let program = parse_program(src).unwrap();
        run_forward(&program, &Bindings::new(), inputs)
    }

    #[test]
    fn test_add_scalar_broadcast() {
        let out = run("forward(x):\n return x + 1\n", &[t(&[3], &[0.0, 1.0, 2.0])]).unwrap();
        assert_eq!(out[0].data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_shape_mismatch_is_runtime_error() {
        let err = run(
            "forward(a, b):\n return a * b\n",
            &[t(&[2], &[1.0, 2.0]), t(&[3], &[1.0, 2.0, 3.0])],
        )
        .unwrap_err();
        assert!(matches!(err, ExecError::Shape(_)));
    }

    #[test]
    fn test_reductions_are_scalars() {
        let x = t(&[4], &[1.0, -2.0, 3.0, 6.0]);
        let sum = run("forward(x):\n return sum(x)\n", &[x.clone()]).unwrap();
        assert!(sum[0].is_scalar());
        assert_eq!(sum[0].data(), &[8.0]);
        let mean = run("forward(x):\n return mean(x)\n", &[x.clone()]).unwrap();
        assert_eq!(mean[0].data(), &[2.0]);
        let max = run("forward(x):\n return max(x) - min(x)\n", &[x]).unwrap();
        assert_eq!(max[0].data(), &[8.0]);
    }

    #[test]
    fn test_matmul() {
        let a = t(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = t(&[2, 1], &[1.0, 1.0]);
        let out = run("forward(a, b):\n return matmul(a, b)\n", &[a, b]).unwrap();
        assert_eq!(out[0].shape(), &[2, 1]);
        assert_eq!(out[0].data(), &[3.0, 7.0]);
    }

    #[test]
    fn test_matmul_rejects_bad_shapes() {
        let a = t(&[2, 3], &[0.0; 6]);
        let err = run("forward(a):\n return matmul(a, a)\n", &[a]).unwrap_err();
        assert!(matches!(err, ExecError::Shape(_)));
    }

    #[test]
    fn test_elementwise_functions() {
        let x = t(&[2], &[-1.0, 4.0]);
        let out = run("forward(x):\n let r = relu(x)\n return sqrt(r) + abs(-x)\n", &[x]).unwrap();
        assert_eq!(out[0].data(), &[1.0, 6.0]);
    }

    #[test]
    fn test_wrong_input_count() {
        let err = run("forward(x):\n return x\n", &[]).unwrap_err();
        assert_eq!(err, ExecError::Arity { expected: 1, actual: 0 });
    }

    #[test]
    fn test_state_bindings_visible() {
        let program = parse_program("init scale = 2\nforward(x):\n return x * scale\n").unwrap();
        let mut state = Bindings::new();
        state.insert("scale".to_string(), Tensor::scalar(3.0));
        let out = run_forward(&program, &state, &[t(&[1], &[2.0])]).unwrap();
        assert_eq!(out[0].data(), &[6.0]);
    }
}
