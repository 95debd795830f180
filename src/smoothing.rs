use std::collections::VecDeque;

/// Exponential moving average step. Cold start returns `next`.
pub fn ema(prev: Option<f64>, next: f64, alpha: f64) -> f64 {
    match prev {
        None => next,
        Some(p) => p + alpha * (next - p),
    }
}

/// Bounded FIFO that reports the median of its contents.
///
/// Used to knock out single-sample distance spikes before the final EMA.
#[derive(Clone, Debug)]
pub struct MedianWindow {
    window: VecDeque<f64>,
    window_size: usize,
}

impl MedianWindow {
    /// Create a window holding at most `window_size` samples (typically 3-5).
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        MedianWindow {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Push a sample and return the median of the window.
    pub fn push(&mut self, value: f64) -> f64 {
        self.window.push_back(value);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        self.median().unwrap_or(value)
    }

    /// Median of the current contents. Even lengths take the upper middle element.
    pub fn median(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(sorted[sorted.len() / 2])
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = &f64> {
        self.window.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_cold_start() {
        assert_eq!(ema(None, 5.0, 0.3), 5.0);
    }

    #[test]
    fn test_ema_step() {
        assert!((ema(Some(10.0), 20.0, 0.25) - 12.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_value() {
        let mut window = MedianWindow::new(3);
        assert_eq!(window.push(5.0), 5.0);
    }

    #[test]
    fn test_spike_rejected() {
        let mut window = MedianWindow::new(3);
        window.push(10.0);
        window.push(11.0);
        // One wild sample cannot move the median past its neighbours
        let m = window.push(500.0);
        assert_eq!(m, 11.0);
    }

    #[test]
    fn test_window_wrapping() {
        let mut window = MedianWindow::new(2);
        window.push(1.0);
        window.push(2.0);
        window.push(3.0); // drops 1.0
        assert_eq!(window.len(), 2);
        assert_eq!(window.samples().copied().collect::<Vec<_>>(), vec![2.0, 3.0]);
        // Even length: upper middle
        assert_eq!(window.median(), Some(3.0));
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let mut window = MedianWindow::new(0);
        window.push(1.0);
        window.push(2.0);
        assert_eq!(window.len(), 1);
    }
}
