use super::adam::{Adam, Moments};
use super::{glorot_uniform, Regressor};
use crate::services::sequences::WindowTensor;
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::rngs::StdRng;

/// Dense ReLU hidden layer followed by a linear output unit.
#[derive(Debug, Clone)]
pub struct MlpRegressor {
    input_width: usize,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: Array1<f64>,
    adam: Adam,
    w1_moments: Moments<Ix2>,
    b1_moments: Moments<Ix1>,
    w2_moments: Moments<Ix1>,
    b2_moments: Moments<Ix1>,
}

struct Activations {
    pre: Array2<f64>,
    hidden: Array2<f64>,
    output: Array1<f64>,
}

struct Gradients {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: Array1<f64>,
}

impl MlpRegressor {
    pub fn new(input_width: usize, units: usize, learning_rate: f64, rng: &mut StdRng) -> Self {
        let w1 = glorot_uniform(rng, units, input_width);
        let b1 = Array1::zeros(units);
        let w2 = glorot_uniform(rng, 1, units).row(0).to_owned();
        let b2 = Array1::zeros(1);
        Self {
            input_width,
            w1_moments: Moments::zeros_like(&w1),
            b1_moments: Moments::zeros_like(&b1),
            w2_moments: Moments::zeros_like(&w2),
            b2_moments: Moments::zeros_like(&b2),
            w1,
            b1,
            w2,
            b2,
            adam: Adam::new(learning_rate),
        }
    }

    fn flat<'a>(&self, x: &'a WindowTensor) -> Result<&'a Array2<f64>, String> {
        match x {
            WindowTensor::Flat(x) if x.ncols() == self.input_width => Ok(x),
            WindowTensor::Flat(x) => Err(format!(
                "feed-forward model expects {} inputs, got {}",
                self.input_width,
                x.ncols()
            )),
            WindowTensor::Sequence(_) => {
                Err("feed-forward model expects flattened windows".to_string())
            }
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Activations {
        let pre = x.dot(&self.w1.t()) + &self.b1;
        let hidden = pre.mapv(|v| v.max(0.0));
        let output = hidden.dot(&self.w2) + self.b2[0];
        Activations {
            pre,
            hidden,
            output,
        }
    }

    /// Batch MSE and its gradient with respect to every parameter.
    fn backward(&self, x: &Array2<f64>, y: &Array1<f64>) -> (f64, Gradients) {
        let batch = x.nrows() as f64;
        let acts = self.forward(x);

        let diff = &acts.output - y;
        let loss = diff.mapv(|d| d * d).sum() / batch;
        let d_out = diff * (2.0 / batch);

        let w2 = acts.hidden.t().dot(&d_out);
        let b2 = Array1::from_elem(1, d_out.sum());
        let d_hidden = d_out
            .view()
            .insert_axis(Axis(1))
            .dot(&self.w2.view().insert_axis(Axis(0)));
        let d_pre = d_hidden * acts.pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let w1 = d_pre.t().dot(x);
        let b1 = d_pre.sum_axis(Axis(0));

        (loss, Gradients { w1, b1, w2, b2 })
    }
}

impl Regressor for MlpRegressor {
    fn train_batch(&mut self, x: &WindowTensor, y: &Array1<f64>) -> Result<f64, String> {
        let x = self.flat(x)?;
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(format!(
                "batch has {} windows and {} targets",
                x.nrows(),
                y.len()
            ));
        }
        let (loss, grads) = self.backward(x, y);

        self.adam.tick();
        self.adam.update(&mut self.w1, &grads.w1, &mut self.w1_moments);
        self.adam.update(&mut self.b1, &grads.b1, &mut self.b1_moments);
        self.adam.update(&mut self.w2, &grads.w2, &mut self.w2_moments);
        self.adam.update(&mut self.b2, &grads.b2, &mut self.b2_moments);

        Ok(loss)
    }

    fn predict(&self, x: &WindowTensor) -> Result<Array1<f64>, String> {
        let x = self.flat(x)?;
        Ok(self.forward(x).output)
    }
}
