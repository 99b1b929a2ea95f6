// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

// Fixed vocabulary for intent scoring. Keywords are matched as
// lowercase substrings; patterns are case-insensitive regexes.

pub(super) const CODE_KEYWORDS: &[&str] = &[
    "code", "coding", "program", "programming", "function", "class", "debug",
    "error", "bug", "script", "python", "javascript", "java", "sql", "api",
    "implement", "algorithm", "data structure", "syntax", "compile", "runtime",
    "exception", "variable", "loop", "array", "write a", "create a function",
    "fix this", "refactor", "show me code", "example code", "code snippet",
    "how to code", "write code", "programming language", "library", "package",
    "module", "import", "dictionary", "list comprehension", "lambda", "decorator",
];

pub(super) const MATH_KEYWORDS: &[&str] = &[
    "calculate", "compute", "solve", "equation", "formula", "math", "derivative",
    "integral", "probability", "statistics", "matrix", "vector", "linear algebra",
    "calculus", "proof", "theorem", "sum", "product", "factorial", "logarithm",
    "exponential", "regression", "correlation", "variance", "standard deviation",
    "hypothesis", "p-value", "confidence interval", "mean", "median", "mode",
    "distribution", "normal distribution", "t-test", "chi-square", "anova",
    "bayesian", "optimization", "minimize", "maximize",
];

pub(super) const THEORY_KEYWORDS: &[&str] = &[
    "explain", "what is", "how does", "describe", "concept", "theory", "principle",
    "why", "definition", "overview", "introduction", "understand", "intuition",
    "behind", "machine learning", "deep learning", "neural network", "pca",
    "clustering", "classification", "supervised", "unsupervised",
    "reinforcement learning", "gradient descent", "backpropagation", "overfitting",
    "regularization", "bias", "feature engineering", "cross-validation", "ensemble",
    "data science", "data analysis", "exploratory", "eda", "model", "training",
    "testing", "validation", "accuracy", "precision", "recall", "f1-score", "roc",
    "auc", "confusion matrix",
];

/// Unambiguous code structure.
pub(super) const CODE_PATTERNS: &[&str] = &[
    r"def\s+\w+\s*\(",
    r"class\s+\w+",
    r"import\s+\w+",
    r"from\s+\w+\s+import",
    r"function\s+\w+",
    r"const\s+\w+",
    r"let\s+\w+",
    r"var\s+\w+",
    r"print\s*\(",
    r"return\s+",
    r"if\s+.*:",
    r"for\s+.*in",
    r"while\s+",
    r"\.py\b",
    r"\.js\b",
    r"\.java\b",
    r"```",
    r"<code>",
];

/// Arithmetic, operators and mathematical symbols.
pub(super) const MATH_PATTERNS: &[&str] = &[
    r"[0-9]+\s*[-+*/=^]\s*[0-9]+",
    r"∑|∫|√|²|³|π|∞",
    r"[a-z]\s*=\s*[0-9]",
    r"f\(x\)",
    r"lim\s*\(",
    r"log\s*\(",
    r"[0-9]+\s*%",
    r"[0-9]+\s*/\s*[0-9]+",
    r"\$\s*[0-9]",
];

/// Leading interrogatives, anchored at the start of the message.
pub(super) const THEORY_PATTERNS: &[&str] = &[
    r"^what\s+is",
    r"^how\s+does",
    r"^why\s+",
    r"^explain\s+",
    r"^describe\s+",
    r"^tell\s+me\s+about",
    r"^can\s+you\s+explain",
];

pub(super) const CODE_PATTERN_WEIGHT: u32 = 5;
pub(super) const MATH_PATTERN_WEIGHT: u32 = 5;
pub(super) const THEORY_PATTERN_WEIGHT: u32 = 2;
