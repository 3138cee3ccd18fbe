// Stereo feedback delay.
//
// One-second circular buffers per channel; the feedback path runs through a
// one-pole low-pass at ~3 kHz so repeats darken the way a tape echo does.

use std::f32::consts::PI;

#[derive(Clone)]
pub struct StereoDelay {
    sample_rate: f32,
    time: f32,
    feedback: f32,
    mix: f32,

    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    max_delay_samples: usize,

    filter_state_l: f32,
    filter_state_r: f32,
    filter_coeff: f32,
}

impl StereoDelay {
    pub fn new(sample_rate: f32) -> Self {
        let max_delay_samples = sample_rate as usize;
        let mut delay = Self {
            sample_rate,
            time: 0.25,
            feedback: 0.3,
            mix: 0.3,
            buffer_l: vec![0.0; max_delay_samples],
            buffer_r: vec![0.0; max_delay_samples],
            write_pos: 0,
            delay_samples: 0,
            max_delay_samples,
            filter_state_l: 0.0,
            filter_state_r: 0.0,
            filter_coeff: 0.3,
        };
        delay.filter_coeff = 1.0 - (-2.0 * PI * 3000.0 / sample_rate).exp();
        delay.update_delay_samples();
        delay
    }

    pub fn set_time(&mut self, time_seconds: f32) {
        self.time = time_seconds.clamp(0.05, 0.5);
        self.update_delay_samples();
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, 0.8);
    }

    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    fn update_delay_samples(&mut self) {
        self.delay_samples =
            ((self.time * self.sample_rate) as usize).min(self.max_delay_samples - 1);
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let read_pos = (self.write_pos + self.max_delay_samples - self.delay_samples)
            % self.max_delay_samples;

        let delayed_l = self.buffer_l[read_pos];
        let delayed_r = self.buffer_r[read_pos];

        // Darken the feedback, not the tap itself.
        self.filter_state_l += self.filter_coeff * (delayed_l - self.filter_state_l);
        self.filter_state_r += self.filter_coeff * (delayed_r - self.filter_state_r);

        self.buffer_l[self.write_pos] = left + self.filter_state_l * self.feedback;
        self.buffer_r[self.write_pos] = right + self.filter_state_r * self.feedback;

        self.write_pos += 1;
        if self.write_pos >= self.max_delay_samples {
            self.write_pos = 0;
        }

        (
            left * (1.0 - self.mix) + delayed_l * self.mix,
            right * (1.0 - self.mix) + delayed_r * self.mix,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_when_mix_is_zero() {
        let mut delay = StereoDelay::new(48000.0);
        delay.set_mix(0.0);
        let (l, r) = delay.process(0.7, -0.4);
        assert_eq!((l, r), (0.7, -0.4));
    }

    #[test]
    fn echo_arrives_after_the_delay_time() {
        let mut delay = StereoDelay::new(48000.0);
        delay.set_time(0.1);
        delay.set_mix(1.0);
        delay.set_feedback(0.0);

        let (l0, _) = delay.process(1.0, 1.0);
        assert_eq!(l0, 0.0);

        let delay_samples = (0.1 * 48000.0) as usize;
        let mut echo = 0.0;
        for i in 1..=delay_samples {
            let (l, _) = delay.process(0.0, 0.0);
            if i == delay_samples {
                echo = l;
            } else {
                assert!(l.abs() < 1e-6, "early echo at sample {}", i);
            }
        }
        assert!((echo - 1.0).abs() < 1e-6, "echo level {}", echo);
    }

    #[test]
    fn time_is_clamped() {
        let mut delay = StereoDelay::new(48000.0);
        delay.set_time(10.0);
        assert!(delay.delay_samples <= (0.5 * 48000.0) as usize);
    }
}
