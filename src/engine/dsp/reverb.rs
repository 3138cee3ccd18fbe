// Schroeder reverb.
//
// Four parallel damped comb filters into two series allpasses per channel.
// The right channel runs slightly longer delays for stereo decorrelation.

const COMB_DELAYS: [usize; 4] = [1557, 1617, 1491, 1422];
const ALLPASS_DELAYS: [usize; 2] = [225, 556];
const RIGHT_COMB_OFFSET: usize = 23;
const RIGHT_ALLPASS_OFFSET: usize = 11;

#[derive(Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    filter_state: f32,
    feedback: f32,
    damping: f32,
}

impl CombFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            filter_state: 0.0,
            feedback: 0.7,
            damping: 0.5,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        // Buffer length is the delay; the write index always points at the
        // oldest sample.
        let delayed = self.buffer[self.write_pos];

        self.filter_state = delayed * (1.0 - self.damping) + self.filter_state * self.damping;
        self.buffer[self.write_pos] = input + self.filter_state * self.feedback;

        self.write_pos += 1;
        if self.write_pos >= self.buffer.len() {
            self.write_pos = 0;
        }

        delayed
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.write_pos = 0;
    }
}

#[derive(Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    feedback: f32,
}

impl AllpassFilter {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            feedback: 0.5,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.write_pos];
        let output = -input + delayed;

        self.buffer[self.write_pos] = input + delayed * self.feedback;

        self.write_pos += 1;
        if self.write_pos >= self.buffer.len() {
            self.write_pos = 0;
        }

        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

#[derive(Clone)]
pub struct Reverb {
    size: f32,
    damping: f32,
    mix: f32,

    combs_l: [CombFilter; 4],
    combs_r: [CombFilter; 4],
    allpass_l: [AllpassFilter; 2],
    allpass_r: [AllpassFilter; 2],
}

impl Reverb {
    pub fn new(sample_rate: f32) -> Self {
        let scale = sample_rate / 48000.0;
        let comb_len = |base: usize| ((base as f32) * scale) as usize;

        let mut reverb = Self {
            size: 0.5,
            damping: 0.5,
            mix: 0.3,
            combs_l: std::array::from_fn(|i| CombFilter::new(comb_len(COMB_DELAYS[i]))),
            combs_r: std::array::from_fn(|i| {
                CombFilter::new(comb_len(COMB_DELAYS[i] + RIGHT_COMB_OFFSET))
            }),
            allpass_l: std::array::from_fn(|i| AllpassFilter::new(comb_len(ALLPASS_DELAYS[i]))),
            allpass_r: std::array::from_fn(|i| {
                AllpassFilter::new(comb_len(ALLPASS_DELAYS[i] + RIGHT_ALLPASS_OFFSET))
            }),
        };
        reverb.set_size(reverb.size);
        reverb.set_damping(reverb.damping);
        reverb
    }

    pub fn set_size(&mut self, size: f32) {
        self.size = size.clamp(0.0, 1.0);
        let feedback = 0.5 + self.size * 0.45;
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.feedback = feedback;
        }
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.damping = damping.clamp(0.0, 1.0);
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.damping = self.damping;
        }
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.clear();
        }
        for ap in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            ap.clear();
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let mono = (left + right) * 0.5;

        let mut comb_sum_l = 0.0;
        let mut comb_sum_r = 0.0;
        for i in 0..4 {
            comb_sum_l += self.combs_l[i].process(mono);
            comb_sum_r += self.combs_r[i].process(mono);
        }

        let mut wet_l = comb_sum_l * 0.25;
        let mut wet_r = comb_sum_r * 0.25;

        for i in 0..2 {
            wet_l = self.allpass_l[i].process(wet_l);
            wet_r = self.allpass_r[i].process(wet_r);
        }

        (
            left * (1.0 - self.mix) + wet_l * self.mix,
            right * (1.0 - self.mix) + wet_r * self.mix,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_when_mix_is_zero() {
        let mut reverb = Reverb::new(48000.0);
        reverb.set_mix(0.0);
        let (l, r) = reverb.process(0.3, -0.3);
        assert_eq!((l, r), (0.3, -0.3));
    }

    #[test]
    fn impulse_produces_a_decaying_tail() {
        let mut reverb = Reverb::new(48000.0);
        reverb.set_mix(1.0);
        reverb.set_size(0.8);

        reverb.process(1.0, 1.0);
        let mut early = 0.0f32;
        for _ in 0..4800 {
            let (l, _) = reverb.process(0.0, 0.0);
            early = early.max(l.abs());
        }
        assert!(early > 0.0, "no reverb tail");

        // Skip ahead two seconds; the tail must have decayed substantially.
        for _ in 0..96000 {
            reverb.process(0.0, 0.0);
        }
        let mut late = 0.0f32;
        for _ in 0..4800 {
            let (l, _) = reverb.process(0.0, 0.0);
            late = late.max(l.abs());
        }
        assert!(late < early * 0.5, "tail not decaying: {} vs {}", late, early);
    }

    #[test]
    fn channels_decorrelate() {
        let mut reverb = Reverb::new(48000.0);
        reverb.set_mix(1.0);
        reverb.process(1.0, 1.0);
        let mut diff = 0.0f32;
        for _ in 0..9600 {
            let (l, r) = reverb.process(0.0, 0.0);
            diff = diff.max((l - r).abs());
        }
        assert!(diff > 1e-4, "left and right are identical");
    }
}
