use super::adam::{Adam, Moments};
use super::{glorot_uniform, uniform_matrix, Regressor};
use crate::services::sequences::WindowTensor;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis, Ix1, Ix2, Zip};
use rand::rngs::StdRng;

/// Single LSTM layer read out by a linear unit on the last hidden state.
///
/// Gate weights are stacked row-wise in the order input, forget, cell,
/// output: `w` is `4H x F`, `u` is `4H x H`, `b` is `4H`.
#[derive(Debug, Clone)]
pub struct LstmRegressor {
    features: usize,
    hidden: usize,
    w: Array2<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
    w_out: Array1<f64>,
    b_out: Array1<f64>,
    adam: Adam,
    w_moments: Moments<Ix2>,
    u_moments: Moments<Ix2>,
    b_moments: Moments<Ix1>,
    w_out_moments: Moments<Ix1>,
    b_out_moments: Moments<Ix1>,
}

/// Values of one time step kept for backpropagation.
struct StepTrace {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    c: Array1<f64>,
}

struct Gradients {
    w: Array2<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
    w_out: Array1<f64>,
    b_out: Array1<f64>,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `acc += a * b^T`
fn add_outer(acc: &mut Array2<f64>, a: &Array1<f64>, b: &Array1<f64>) {
    Zip::from(acc.rows_mut())
        .and(a)
        .for_each(|mut row, &scale| row.scaled_add(scale, b));
}

impl LstmRegressor {
    pub fn new(features: usize, units: usize, learning_rate: f64, rng: &mut StdRng) -> Self {
        let gates = 4 * units;
        let w = glorot_uniform(rng, gates, features);
        let u = uniform_matrix(rng, gates, units, (1.0 / units as f64).sqrt());
        let mut b = Array1::zeros(gates);
        b.slice_mut(s![units..2 * units]).fill(1.0);
        let w_out = glorot_uniform(rng, 1, units).row(0).to_owned();
        let b_out = Array1::zeros(1);
        Self {
            features,
            hidden: units,
            w_moments: Moments::zeros_like(&w),
            u_moments: Moments::zeros_like(&u),
            b_moments: Moments::zeros_like(&b),
            w_out_moments: Moments::zeros_like(&w_out),
            b_out_moments: Moments::zeros_like(&b_out),
            w,
            u,
            b,
            w_out,
            b_out,
            adam: Adam::new(learning_rate),
        }
    }

    fn sequences<'a>(&self, x: &'a WindowTensor) -> Result<&'a Array3<f64>, String> {
        match x {
            WindowTensor::Sequence(x) if x.len_of(Axis(2)) == self.features => Ok(x),
            WindowTensor::Sequence(x) => Err(format!(
                "sequential model expects {} features per step, got {}",
                self.features,
                x.len_of(Axis(2))
            )),
            WindowTensor::Flat(_) => Err("sequential model expects rank-3 windows".to_string()),
        }
    }

    fn run(&self, window: ArrayView2<'_, f64>, trace: Option<&mut Vec<StepTrace>>) -> Array1<f64> {
        let hidden = self.hidden;
        let mut h = Array1::zeros(hidden);
        let mut c = Array1::zeros(hidden);
        let mut trace = trace;

        for x_t in window.rows() {
            let x_t = x_t.to_owned();
            let a = self.w.dot(&x_t) + self.u.dot(&h) + &self.b;
            let i = a.slice(s![..hidden]).mapv(sigmoid);
            let f = a.slice(s![hidden..2 * hidden]).mapv(sigmoid);
            let g = a.slice(s![2 * hidden..3 * hidden]).mapv(f64::tanh);
            let o = a.slice(s![3 * hidden..]).mapv(sigmoid);
            let c_next = &f * &c + &i * &g;
            let h_next = &o * &c_next.mapv(f64::tanh);

            if let Some(trace) = trace.as_deref_mut() {
                trace.push(StepTrace {
                    x: x_t,
                    h_prev: h,
                    c_prev: c,
                    i,
                    f,
                    g,
                    o,
                    c: c_next.clone(),
                });
            }
            h = h_next;
            c = c_next;
        }
        h
    }

    fn output(&self, h: &Array1<f64>) -> f64 {
        self.w_out.dot(h) + self.b_out[0]
    }

    fn backward(&self, trace: &[StepTrace], d_y: f64, h_last: &Array1<f64>, grads: &mut Gradients) {
        let hidden = self.hidden;
        grads.w_out.scaled_add(d_y, h_last);
        grads.b_out[0] += d_y;

        let mut d_h = &self.w_out * d_y;
        let mut d_c = Array1::<f64>::zeros(hidden);
        let mut d_a = Array1::<f64>::zeros(4 * hidden);

        for step in trace.iter().rev() {
            let tanh_c = step.c.mapv(f64::tanh);
            let d_o = &d_h * &tanh_c;
            d_c = d_c + &d_h * &step.o * &tanh_c.mapv(|t| 1.0 - t * t);
            let d_i = &d_c * &step.g;
            let d_g = &d_c * &step.i;
            let d_f = &d_c * &step.c_prev;

            d_a.slice_mut(s![..hidden])
                .assign(&(d_i * &step.i.mapv(|v| v * (1.0 - v))));
            d_a.slice_mut(s![hidden..2 * hidden])
                .assign(&(d_f * &step.f.mapv(|v| v * (1.0 - v))));
            d_a.slice_mut(s![2 * hidden..3 * hidden])
                .assign(&(d_g * &step.g.mapv(|v| 1.0 - v * v)));
            d_a.slice_mut(s![3 * hidden..])
                .assign(&(d_o * &step.o.mapv(|v| v * (1.0 - v))));

            add_outer(&mut grads.w, &d_a, &step.x);
            add_outer(&mut grads.u, &d_a, &step.h_prev);
            grads.b += &d_a;

            d_h = self.u.t().dot(&d_a);
            d_c = d_c * &step.f;
        }
    }
}

impl Regressor for LstmRegressor {
    fn train_batch(&mut self, x: &WindowTensor, y: &Array1<f64>) -> Result<f64, String> {
        let x = self.sequences(x)?;
        let samples = x.len_of(Axis(0));
        if samples != y.len() || samples == 0 {
            return Err(format!("batch has {samples} windows and {} targets", y.len()));
        }
        let batch = samples as f64;

        let mut grads = Gradients {
            w: Array2::zeros(self.w.raw_dim()),
            u: Array2::zeros(self.u.raw_dim()),
            b: Array1::zeros(self.b.raw_dim()),
            w_out: Array1::zeros(self.w_out.raw_dim()),
            b_out: Array1::zeros(1),
        };
        let mut loss = 0.0;
        let mut trace = Vec::with_capacity(x.len_of(Axis(1)));

        for (window, target) in x.outer_iter().zip(y.iter()) {
            trace.clear();
            let h = self.run(window, Some(&mut trace));
            let diff = self.output(&h) - target;
            loss += diff * diff;
            self.backward(&trace, 2.0 * diff / batch, &h, &mut grads);
        }

        self.adam.tick();
        self.adam.update(&mut self.w, &grads.w, &mut self.w_moments);
        self.adam.update(&mut self.u, &grads.u, &mut self.u_moments);
        self.adam.update(&mut self.b, &grads.b, &mut self.b_moments);
        self.adam
            .update(&mut self.w_out, &grads.w_out, &mut self.w_out_moments);
        self.adam
            .update(&mut self.b_out, &grads.b_out, &mut self.b_out_moments);

        Ok(loss / batch)
    }

    fn predict(&self, x: &WindowTensor) -> Result<Array1<f64>, String> {
        let x = self.sequences(x)?;
        Ok(x.outer_iter()
            .map(|window| self.output(&self.run(window, None)))
            .collect())
    }
}
