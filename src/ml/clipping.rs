// ============================================================
// Layer 5 — Global-Norm Gradient Clipping
// ============================================================
// Burn's built-in clipping works per parameter. Training here
// clips by the norm of ALL gradients taken together and reports
// that norm, so it walks the module twice:
//
//   1. GradientNorm   sums ‖g‖² over every trainable parameter
//   2. GradientScaler multiplies each gradient by
//                       max_norm / max(norm, max_norm)
//
// Frozen parameters have no gradient entry and are skipped.

use burn::{
    module::{ModuleVisitor, Param},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

struct GradientNorm<'a> {
    grads:  &'a GradientsParams,
    sum_sq: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientNorm<'_> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(param.id) {
            self.sum_sq += grad.powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        }
    }
}

struct GradientScaler<'a> {
    grads: &'a mut GradientsParams,
    scale: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientScaler<'_> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(param.id) {
            self.grads.register::<B::InnerBackend, D>(param.id, grad.mul_scalar(self.scale));
        }
    }
}

/// Global L2 norm of all gradients registered for `module`
pub fn global_norm<B: AutodiffBackend, M: Module<B>>(module: &M, grads: &GradientsParams) -> f64 {
    let mut visitor = GradientNorm { grads, sum_sq: 0.0 };
    module.visit(&mut visitor);
    visitor.sum_sq.sqrt()
}

/// Factor that brings `norm` down to at most `max_norm`
pub fn clip_scale(norm: f64, max_norm: f64) -> f64 {
    max_norm / norm.max(max_norm)
}

/// Clip all gradients of `module` to a global norm of `max_norm`.
/// Returns the norm measured before clipping.
pub fn clip_by_global_norm<B: AutodiffBackend, M: Module<B>>(
    module:   &M,
    grads:    &mut GradientsParams,
    max_norm: f64,
) -> f64 {
    let norm = global_norm::<B, M>(module, grads);
    let scale = clip_scale(norm, max_norm);
    if scale < 1.0 {
        let mut scaler = GradientScaler { grads, scale };
        module.visit(&mut scaler);
    }
    norm
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{Linear, LinearConfig};

    type B = Autodiff<NdArray>;

    #[test]
    fn test_clip_scale() {
        assert_eq!(clip_scale(0.5, 1.0), 1.0);
        assert_eq!(clip_scale(1.0, 1.0), 1.0);
        assert!((clip_scale(4.0, 1.0) - 0.25).abs() < 1e-12);
    }

    fn linear_with_grads() -> (Linear<B>, GradientsParams) {
        let device = Default::default();
        let linear: Linear<B> = LinearConfig::new(3, 2).init(&device);
        let x = Tensor::<B, 2>::ones([4, 3], &device);
        // Sum of outputs scaled up so the gradient norm is well above 1
        let loss = linear.forward(x).sum().mul_scalar(10.0);
        let grads = GradientsParams::from_grads(loss.backward(), &linear);
        (linear, grads)
    }

    #[test]
    fn test_clipping_brings_norm_to_max() {
        let (linear, mut grads) = linear_with_grads();
        let before = clip_by_global_norm::<B, _>(&linear, &mut grads, 1.0);
        assert!(before > 1.0);
        let after = global_norm::<B, _>(&linear, &grads);
        assert!((after - 1.0).abs() < 1e-4, "norm after clipping {after}");
    }

    #[test]
    fn test_small_gradients_untouched() {
        let (linear, mut grads) = linear_with_grads();
        let before = global_norm::<B, _>(&linear, &grads);
        let reported = clip_by_global_norm::<B, _>(&linear, &mut grads, before * 2.0);
        assert!((reported - before).abs() < 1e-9);
        assert!((global_norm::<B, _>(&linear, &grads) - before).abs() < 1e-6);
    }
}
