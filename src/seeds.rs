//! Built-in challenge content that keeps the service useful without a model.
//!
//! `fallback_templates` feeds the fallback table; `emergency_challenge` is the
//! single hardcoded item served when even that table cannot produce anything.

use serde_json::{json, Map, Value};

use crate::domain::{Challenge, ChallengeMetadata, ChallengeSource, Difficulty, TestCase};

fn case(input: Value, expected: &str) -> TestCase {
  let input = match input {
    Value::Object(m) => m,
    _ => Map::new(),
  };
  TestCase { input, expected: expected.to_string() }
}

fn template(
  title: &str,
  language: &str,
  difficulty: Difficulty,
  description: &str,
  starter_code: &str,
  solution: &str,
  test_cases: Vec<TestCase>,
) -> Challenge {
  Challenge {
    title: title.into(),
    language: language.into(),
    difficulty,
    description: description.into(),
    starter_code: starter_code.into(),
    solution: solution.into(),
    test_cases,
    metadata: ChallengeMetadata { source: ChallengeSource::Fallback, ..ChallengeMetadata::default() },
  }
}

/// Curated offline challenges, several per bucket for the common languages.
pub fn fallback_templates() -> Vec<Challenge> {
  use Difficulty::*;
  vec![
    // --- JavaScript ---
    template(
      "Sum of Two Numbers",
      "JavaScript",
      Beginner,
      "Write a function `add(a, b)` that returns the sum of two numbers.",
      "function add(a, b) {\n  // your code here\n}\n",
      "function add(a, b) {\n  return a + b;\n}\n",
      vec![case(json!({"a": 2, "b": 3}), "5"), case(json!({"a": -1, "b": 1}), "0")],
    ),
    template(
      "Reverse a String",
      "JavaScript",
      Beginner,
      "Write a function `reverse(s)` that returns the characters of `s` in reverse order.",
      "function reverse(s) {\n  // your code here\n}\n",
      "function reverse(s) {\n  return s.split('').reverse().join('');\n}\n",
      vec![case(json!({"s": "hello"}), "olleh"), case(json!({"s": ""}), "")],
    ),
    template(
      "Count Vowels",
      "JavaScript",
      Beginner,
      "Write a function `countVowels(s)` that returns how many vowels (a, e, i, o, u) appear in `s`, ignoring case.",
      "function countVowels(s) {\n  // your code here\n}\n",
      "function countVowels(s) {\n  return (s.match(/[aeiou]/gi) || []).length;\n}\n",
      vec![case(json!({"s": "Programming"}), "3"), case(json!({"s": "xyz"}), "0")],
    ),
    template(
      "Two Sum",
      "JavaScript",
      Intermediate,
      "Given an array of integers `nums` and a `target`, return the indices of the two numbers that add up to the target.",
      "function twoSum(nums, target) {\n  // your code here\n}\n",
      "function twoSum(nums, target) {\n  const seen = new Map();\n  for (let i = 0; i < nums.length; i++) {\n    const j = seen.get(target - nums[i]);\n    if (j !== undefined) return [j, i];\n    seen.set(nums[i], i);\n  }\n  return [];\n}\n",
      vec![case(json!({"nums": [2, 7, 11, 15], "target": 9}), "[0,1]"), case(json!({"nums": [3, 2, 4], "target": 6}), "[1,2]")],
    ),
    template(
      "Valid Parentheses",
      "JavaScript",
      Intermediate,
      "Given a string containing only the characters ()[]{}, determine whether every bracket is closed in the correct order.",
      "function isValid(s) {\n  // your code here\n}\n",
      "function isValid(s) {\n  const pairs = { ')': '(', ']': '[', '}': '{' };\n  const stack = [];\n  for (const c of s) {\n    if (pairs[c]) {\n      if (stack.pop() !== pairs[c]) return false;\n    } else {\n      stack.push(c);\n    }\n  }\n  return stack.length === 0;\n}\n",
      vec![case(json!({"s": "()[]{}"}), "true"), case(json!({"s": "(]"}), "false")],
    ),
    template(
      "Merge Intervals",
      "JavaScript",
      Advanced,
      "Given an array of intervals `[start, end]`, merge all overlapping intervals and return the result sorted by start.",
      "function merge(intervals) {\n  // your code here\n}\n",
      "function merge(intervals) {\n  const sorted = [...intervals].sort((a, b) => a[0] - b[0]);\n  const out = [];\n  for (const [s, e] of sorted) {\n    const last = out[out.length - 1];\n    if (last && s <= last[1]) last[1] = Math.max(last[1], e);\n    else out.push([s, e]);\n  }\n  return out;\n}\n",
      vec![case(json!({"intervals": [[1, 3], [2, 6], [8, 10]]}), "[[1,6],[8,10]]")],
    ),
    template(
      "LRU Cache",
      "JavaScript",
      Expert,
      "Implement an `LRUCache` class with `get(key)` and `put(key, value)` that both run in O(1) and evict the least recently used entry when over capacity.",
      "class LRUCache {\n  constructor(capacity) {\n    // your code here\n  }\n  get(key) {}\n  put(key, value) {}\n}\n",
      "class LRUCache {\n  constructor(capacity) {\n    this.capacity = capacity;\n    this.map = new Map();\n  }\n  get(key) {\n    if (!this.map.has(key)) return -1;\n    const v = this.map.get(key);\n    this.map.delete(key);\n    this.map.set(key, v);\n    return v;\n  }\n  put(key, value) {\n    this.map.delete(key);\n    this.map.set(key, value);\n    if (this.map.size > this.capacity) this.map.delete(this.map.keys().next().value);\n  }\n}\n",
      vec![case(json!({"capacity": 2, "ops": [["put", 1, 1], ["put", 2, 2], ["get", 1], ["put", 3, 3], ["get", 2]]}), "[null,null,1,null,-1]")],
    ),
    // --- Python ---
    template(
      "FizzBuzz",
      "Python",
      Beginner,
      "Write a function `fizzbuzz(n)` that returns 'Fizz' for multiples of 3, 'Buzz' for multiples of 5, 'FizzBuzz' for both, otherwise the number as a string.",
      "def fizzbuzz(n):\n    # your code here\n    pass\n",
      "def fizzbuzz(n):\n    if n % 15 == 0:\n        return 'FizzBuzz'\n    if n % 3 == 0:\n        return 'Fizz'\n    if n % 5 == 0:\n        return 'Buzz'\n    return str(n)\n",
      vec![case(json!({"n": 15}), "FizzBuzz"), case(json!({"n": 7}), "7")],
    ),
    template(
      "Find the Maximum",
      "Python",
      Beginner,
      "Write a function `find_max(nums)` that returns the largest number in a non-empty list without using `max`.",
      "def find_max(nums):\n    # your code here\n    pass\n",
      "def find_max(nums):\n    best = nums[0]\n    for n in nums[1:]:\n        if n > best:\n            best = n\n    return best\n",
      vec![case(json!({"nums": [3, 9, 2]}), "9"), case(json!({"nums": [-5, -2]}), "-2")],
    ),
    template(
      "Group Anagrams",
      "Python",
      Intermediate,
      "Write a function `group_anagrams(words)` that groups words that are anagrams of each other, preserving first-seen order.",
      "def group_anagrams(words):\n    # your code here\n    pass\n",
      "def group_anagrams(words):\n    groups = {}\n    for w in words:\n        groups.setdefault(''.join(sorted(w)), []).append(w)\n    return list(groups.values())\n",
      vec![case(json!({"words": ["eat", "tea", "tan", "nat"]}), "[[\"eat\",\"tea\"],[\"tan\",\"nat\"]]")],
    ),
    template(
      "Longest Substring Without Repeats",
      "Python",
      Advanced,
      "Write a function `longest_unique(s)` that returns the length of the longest substring of `s` without repeating characters.",
      "def longest_unique(s):\n    # your code here\n    pass\n",
      "def longest_unique(s):\n    last = {}\n    start = best = 0\n    for i, c in enumerate(s):\n        if c in last and last[c] >= start:\n            start = last[c] + 1\n        last[c] = i\n        best = max(best, i - start + 1)\n    return best\n",
      vec![case(json!({"s": "abcabcbb"}), "3"), case(json!({"s": "bbbbb"}), "1")],
    ),
    template(
      "Word Ladder Length",
      "Python",
      Expert,
      "Given `begin`, `end` and a word list, return the number of words in the shortest transformation sequence changing one letter at a time, or 0 if none exists.",
      "def ladder_length(begin, end, words):\n    # your code here\n    pass\n",
      "from collections import deque\n\ndef ladder_length(begin, end, words):\n    words = set(words)\n    queue = deque([(begin, 1)])\n    while queue:\n        word, depth = queue.popleft()\n        if word == end:\n            return depth\n        for i in range(len(word)):\n            for c in 'abcdefghijklmnopqrstuvwxyz':\n                nxt = word[:i] + c + word[i + 1:]\n                if nxt in words:\n                    words.remove(nxt)\n                    queue.append((nxt, depth + 1))\n    return 0\n",
      vec![case(json!({"begin": "hit", "end": "cog", "words": ["hot", "dot", "dog", "lot", "log", "cog"]}), "5")],
    ),
    // --- Java ---
    template(
      "Palindrome Check",
      "Java",
      Beginner,
      "Implement `isPalindrome(String s)` that returns true when `s` reads the same forwards and backwards.",
      "class Solution {\n    boolean isPalindrome(String s) {\n        // your code here\n        return false;\n    }\n}\n",
      "class Solution {\n    boolean isPalindrome(String s) {\n        int i = 0, j = s.length() - 1;\n        while (i < j) {\n            if (s.charAt(i++) != s.charAt(j--)) return false;\n        }\n        return true;\n    }\n}\n",
      vec![case(json!({"s": "racecar"}), "true"), case(json!({"s": "java"}), "false")],
    ),
    template(
      "Binary Search",
      "Java",
      Intermediate,
      "Implement `search(int[] nums, int target)` returning the index of `target` in the sorted array `nums`, or -1 when absent.",
      "class Solution {\n    int search(int[] nums, int target) {\n        // your code here\n        return -1;\n    }\n}\n",
      "class Solution {\n    int search(int[] nums, int target) {\n        int lo = 0, hi = nums.length - 1;\n        while (lo <= hi) {\n            int mid = lo + (hi - lo) / 2;\n            if (nums[mid] == target) return mid;\n            if (nums[mid] < target) lo = mid + 1; else hi = mid - 1;\n        }\n        return -1;\n    }\n}\n",
      vec![case(json!({"nums": [1, 3, 5, 7], "target": 5}), "2"), case(json!({"nums": [1, 3], "target": 4}), "-1")],
    ),
    // --- C++ ---
    template(
      "Factorial",
      "C++",
      Beginner,
      "Implement `long long factorial(int n)` returning n! for 0 <= n <= 20.",
      "long long factorial(int n) {\n    // your code here\n    return 0;\n}\n",
      "long long factorial(int n) {\n    long long r = 1;\n    for (int i = 2; i <= n; ++i) r *= i;\n    return r;\n}\n",
      vec![case(json!({"n": 5}), "120"), case(json!({"n": 0}), "1")],
    ),
    // --- TypeScript ---
    template(
      "Array Average",
      "TypeScript",
      Beginner,
      "Write a function `average(nums: number[]): number` that returns the mean of the array, or 0 when it is empty.",
      "function average(nums: number[]): number {\n  // your code here\n  return 0;\n}\n",
      "function average(nums: number[]): number {\n  if (nums.length === 0) return 0;\n  return nums.reduce((a, b) => a + b, 0) / nums.length;\n}\n",
      vec![case(json!({"nums": [1, 2, 3, 4]}), "2.5"), case(json!({"nums": []}), "0")],
    ),
    // --- C# ---
    template(
      "Even or Odd",
      "C#",
      Beginner,
      "Implement `static string EvenOrOdd(int n)` returning \"Even\" when n is divisible by 2 and \"Odd\" otherwise.",
      "public static string EvenOrOdd(int n)\n{\n    // your code here\n    return \"\";\n}\n",
      "public static string EvenOrOdd(int n)\n{\n    return n % 2 == 0 ? \"Even\" : \"Odd\";\n}\n",
      vec![case(json!({"n": 4}), "Even"), case(json!({"n": -3}), "Odd")],
    ),
    // --- Go ---
    template(
      "Sum of a Slice",
      "Go",
      Beginner,
      "Write `func Sum(nums []int) int` that returns the sum of all elements, or 0 for an empty slice.",
      "func Sum(nums []int) int {\n\t// your code here\n\treturn 0\n}\n",
      "func Sum(nums []int) int {\n\ttotal := 0\n\tfor _, n := range nums {\n\t\ttotal += n\n\t}\n\treturn total\n}\n",
      vec![case(json!({"nums": [1, 2, 3]}), "6"), case(json!({"nums": []}), "0")],
    ),
    // --- Rust ---
    template(
      "Largest Element",
      "Rust",
      Beginner,
      "Write `fn largest(nums: &[i32]) -> Option<i32>` returning the largest element, or `None` for an empty slice.",
      "fn largest(nums: &[i32]) -> Option<i32> {\n    // your code here\n    None\n}\n",
      "fn largest(nums: &[i32]) -> Option<i32> {\n    nums.iter().copied().max()\n}\n",
      vec![case(json!({"nums": [3, 9, 4]}), "Some(9)"), case(json!({"nums": []}), "None")],
    ),
  ]
}

/// Last line of defense. Always schema-valid; never depends on any table.
pub fn emergency_challenge() -> Challenge {
  let mut ch = template(
    "Hello, World",
    "JavaScript",
    Difficulty::Beginner,
    "Write a function `hello()` that returns the string 'Hello, World!'.",
    "function hello() {\n  // your code here\n}\n",
    "function hello() {\n  return 'Hello, World!';\n}\n",
    vec![case(json!({}), "Hello, World!")],
  );
  ch.metadata.source = ChallengeSource::EmergencyFallback;
  ch
}
