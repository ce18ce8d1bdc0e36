/// 解析以逗号分隔的编号列表，支持`a-b`形式的闭区间，保持给定的顺序。
pub fn id_list(s: &str) -> Result<Vec<u32>, &'static str> {
    const ERR: &str = "编号列表格式错误";
    let mut ids = Vec::new();
    for ranges in s.split(',') {
        let mut d_iter = ranges.trim().split('-');
        let d1: u32 = d_iter.next().ok_or(ERR)?.parse().map_err(|_| ERR)?;
        if let Some(d2) = d_iter.next() {
            let d2: u32 = d2.parse().map_err(|_| ERR)?;
            if d2 < d1 || d_iter.next().is_some() {
                return Err(ERR);
            }
            ids.extend(d1..=d2);
        } else {
            ids.push(d1);
        }
    }
    Ok(ids)
}

/// `[0, 1)`内的比例。
pub fn split_fraction(s: &str) -> Result<f64, &'static str> {
    const ERR: &str = "比例应为[0, 1)内的小数";
    let v: f64 = s.parse().map_err(|_| ERR)?;
    if (0.0..1.0).contains(&v) {
        Ok(v)
    } else {
        Err(ERR)
    }
}

/// 正整数。
pub fn positive(s: &str) -> Result<usize, &'static str> {
    match s.parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err("应为正整数"),
    }
}

/// 把值线性拉伸到`[0, 255]`；所有值相同时输出全0。
pub fn min_max_to_u8(values: &[f32]) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    if !(range > 0.0) {
        return vec![0; values.len()];
    }
    values
        .iter()
        .map(|&v| ((v - min) / range * 255.0).round() as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_list() {
        assert_eq!(id_list("25,26,28,29"), Ok(vec![25, 26, 28, 29]));
        assert_eq!(id_list("3-5,1"), Ok(vec![3, 4, 5, 1]));
        assert_eq!(id_list("7"), Ok(vec![7]));
        assert!(id_list("5-3").is_err());
        assert!(id_list("1-2-3").is_err());
        assert!(id_list("a,b").is_err());
        assert!(id_list("").is_err());
    }

    #[test]
    fn test_split_fraction_and_positive() {
        assert_eq!(split_fraction(".25"), Ok(0.25));
        assert_eq!(split_fraction("0"), Ok(0.0));
        assert!(split_fraction("1").is_err());
        assert!(split_fraction("-0.1").is_err());
        assert_eq!(positive("128"), Ok(128));
        assert!(positive("0").is_err());
    }

    #[test]
    fn test_min_max_to_u8() {
        assert_eq!(min_max_to_u8(&[1.0, 2.0, 3.0]), vec![0, 128, 255]);
        assert_eq!(min_max_to_u8(&[4.0, 4.0]), vec![0, 0]);
        assert!(min_max_to_u8(&[]).is_empty());
    }
}
