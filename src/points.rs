use crate::settings::TrainingPolicy;

/// Training points earned from the role awards of attended activities.
pub fn training_points(attended_awards: &[i32], policy: TrainingPolicy) -> i32 {
    let total: i64 = attended_awards.iter().map(|points| i64::from(*points)).sum();
    total.clamp(0, i64::from(policy.max_points.max(0))) as i32
}

pub fn training_rank(points: i32) -> &'static str {
    match points {
        90.. => "excellent",
        80..=89 => "good",
        65..=79 => "fair",
        50..=64 => "average",
        35..=49 => "weak",
        _ => "poor",
    }
}
