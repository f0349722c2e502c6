/// Discounted returns of a single environment's reward sequence, read backwards. A done flag at
/// step `t` means nothing after `t` contributes to the return of `t`.
pub fn discount_with_dones(rewards: &[f32], dones: &[bool], gamma: f32) -> Vec<f32> {
    discount_from(rewards, dones, gamma, 0.)
}

/// Like [`discount_with_dones`], but the sequence is continued by `last_value` unless its final
/// step ended the episode.
pub fn bootstrapped_returns(rewards: &[f32], dones: &[bool], last_value: f32, gamma: f32) -> Vec<f32> {
    match dones.last() {
        Some(false) => discount_from(rewards, dones, gamma, last_value),
        _ => discount_from(rewards, dones, gamma, 0.),
    }
}

fn discount_from(rewards: &[f32], dones: &[bool], gamma: f32, init: f32) -> Vec<f32> {
    assert_eq!(rewards.len(), dones.len(), "rewards and dones must line up");
    let mut discounted = vec![0.; rewards.len()];
    let mut r = init;
    for i in (0..rewards.len()).rev() {
        let next_non_terminal = if dones[i] { 0. } else { 1. };
        r = rewards[i] + gamma * r * next_non_terminal;
        discounted[i] = r;
    }
    discounted
}
