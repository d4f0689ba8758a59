use std::time::Duration;

use rand::Rng;

use crate::config::Throttle;

/// Delay between two page downloads, adapted to the observed server latency.
///
/// Each response pulls the delay towards `latency / target_concurrency`.
/// Responses that aren't successful never lower the delay and transport
/// failures double it, always within `[download_delay, max_delay]`.
#[derive(Debug, Clone)]
pub struct AutoThrottle {
    conf: Throttle,
    delay: f32,
}

impl AutoThrottle {
    pub fn new(conf: &Throttle) -> Self {
        let delay = if conf.autothrottle {
            conf.start_delay.max(conf.download_delay)
        } else {
            conf.download_delay
        };
        Self {
            conf: conf.clone(),
            delay: delay.max(0.0),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f32(self.delay)
    }

    pub fn on_response(&mut self, latency: Duration, status: u16) {
        if !self.conf.autothrottle {
            return;
        }
        let concurrency = self.conf.target_concurrency.max(f32::EPSILON);
        let target = latency.as_secs_f32() / concurrency;
        let new_delay = self.clamp(((self.delay + target) / 2.0).max(target));

        if !(200..300).contains(&status) && new_delay <= self.delay {
            return;
        }
        if (new_delay - self.delay).abs() > f32::EPSILON {
            log::debug!(
                "Autothrottle delay {:.2}s -> {new_delay:.2}s (latency {:.2}s, status {status})",
                self.delay,
                latency.as_secs_f32()
            );
        }
        self.delay = new_delay;
    }

    pub fn on_failure(&mut self) {
        let doubled = self.clamp((self.delay * 2.0).max(self.conf.download_delay.max(1.0)));
        log::debug!("Backing off to {doubled:.2}s after a failed request");
        self.delay = doubled;
    }

    /// The pause to observe before the next request.
    pub fn next_pause<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let mut secs = self.delay;
        if self.conf.randomize_delay && secs > 0.0 {
            secs *= rng.gen_range(0.5..1.5);
        }
        let (low, high) = self.conf.page_jitter;
        if high > low && low >= 0.0 {
            secs += rng.gen_range(low..high);
        } else if low > 0.0 {
            secs += low;
        }
        Duration::from_secs_f32(secs)
    }

    fn clamp(&self, delay: f32) -> f32 {
        let min = self.conf.download_delay.max(0.0);
        let max = self.conf.max_delay.max(min);
        delay.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn throttle() -> Throttle {
        Throttle {
            download_delay: 1.0,
            randomize_delay: false,
            autothrottle: true,
            start_delay: 2.0,
            max_delay: 10.0,
            target_concurrency: 1.0,
            page_jitter: (0.0, 0.0),
        }
    }

    #[test]
    fn starts_at_start_delay() {
        let t = AutoThrottle::new(&throttle());
        assert_eq!(t.delay(), Duration::from_secs(2));
    }

    #[test]
    fn slow_responses_raise_delay() {
        let mut t = AutoThrottle::new(&throttle());
        t.on_response(Duration::from_secs(6), 200);
        assert_eq!(t.delay(), Duration::from_secs(6));
        t.on_response(Duration::from_secs(30), 200);
        assert_eq!(t.delay(), Duration::from_secs(10));
    }

    #[test]
    fn fast_responses_lower_delay_down_to_minimum() {
        let mut t = AutoThrottle::new(&throttle());
        for _ in 0..20 {
            t.on_response(Duration::from_millis(10), 200);
        }
        assert_eq!(t.delay(), Duration::from_secs(1));
    }

    #[test]
    fn errors_never_lower_delay() {
        let mut t = AutoThrottle::new(&throttle());
        t.on_response(Duration::from_millis(10), 503);
        assert_eq!(t.delay(), Duration::from_secs(2));
    }

    #[test]
    fn failures_double_up_to_max() {
        let mut t = AutoThrottle::new(&throttle());
        t.on_failure();
        assert_eq!(t.delay(), Duration::from_secs(4));
        t.on_failure();
        t.on_failure();
        assert_eq!(t.delay(), Duration::from_secs(10));
    }

    #[test]
    fn disabled_keeps_download_delay() {
        let mut conf = throttle();
        conf.autothrottle = false;
        let mut t = AutoThrottle::new(&conf);
        t.on_response(Duration::from_secs(5), 200);
        assert_eq!(t.delay(), Duration::from_secs(1));
    }

    #[test]
    fn pause_is_randomized_within_bounds() {
        let mut conf = throttle();
        conf.randomize_delay = true;
        conf.page_jitter = (1.5, 3.0);
        let t = AutoThrottle::new(&conf);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let pause = t.next_pause(&mut rng).as_secs_f32();
            assert!((2.5..6.0).contains(&pause), "pause {pause}");
        }
    }
}
